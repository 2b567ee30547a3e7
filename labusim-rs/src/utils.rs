use tokio::task::JoinError;

use crate::types::TestResult;

/// Ensures `name` identifies the client variant under test.
pub fn client_test_name(name: &str, client: &str) -> String {
    if name.is_empty() {
        return client.to_string();
    }
    if name.contains("CLIENT") {
        return name.replace("CLIENT", client);
    }
    format!("{} ({})", name, client)
}

/// Converts the outcome of a spawned test body into a verdict. A panic in
/// the body becomes a failure carrying the panic payload.
pub fn extract_test_result(joined: Result<TestResult, JoinError>) -> TestResult {
    match joined {
        Ok(result) => result,
        Err(err) => {
            let details = if err.is_panic() {
                let payload = err.into_panic();
                if let Some(msg) = payload.downcast_ref::<&'static str>() {
                    msg.to_string()
                } else if let Some(msg) = payload.downcast_ref::<String>() {
                    msg.clone()
                } else {
                    "test body panicked".to_string()
                }
            } else {
                "test body cancelled".to_string()
            };
            TestResult {
                pass: false,
                details,
            }
        }
    }
}
