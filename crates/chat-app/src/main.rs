use murmur::app::{AppError, ChatApp};
use murmur::settings::SettingsStore;
use tracing_subscriber::EnvFilter;

#[snafu::report]
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), AppError> {
    // Logs go to stderr so they never interleave with the transcript on stdout.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let store = SettingsStore::load();
    ChatApp::new(store)?.run().await
}
