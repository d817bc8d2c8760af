pub use ecpg_core::mock::{Call, MockBackend};
use ecpg_core::{CompatMode, Runtime, RuntimeOptions};

pub fn setup_if_needed() {
    let _ = dotenvy::dotenv();
    let _ = env_logger::builder().is_test(true).try_init();
}

// Make a runtime over a fresh mock backend, with one open connection named `db`
// Ensure [dotenvy] and [env_logger] have been setup
pub fn connected() -> anyhow::Result<(Runtime, MockBackend)> {
    connected_with(CompatMode::Pgsql, RuntimeOptions::new())
}

pub fn connected_with(
    compat: CompatMode,
    options: RuntimeOptions,
) -> anyhow::Result<(Runtime, MockBackend)> {
    setup_if_needed();

    let mock = MockBackend::new();
    let rt = Runtime::with_options(mock.clone(), options);
    rt.connect(0, compat, Some("db"), None)?;

    // the connect call itself is not interesting to tests
    mock.clear_calls();

    Ok((rt, mock))
}

pub fn cstr(bytes: &[u8]) -> &str {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    std::str::from_utf8(&bytes[..end]).unwrap_or_default()
}
