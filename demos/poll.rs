use request_poller::{ClientOptions, HttpExecutor, RequestModel, RequestPoller};

/// Loads a run description from the JSON file given as first argument,
/// polls it, and prints the decoded result.
///
/// ```json
/// {
///   "polling": {
///     "target": { "url": "https://jobs.example/jobs/7/status" },
///     "overall_timeout_secs": 35,
///     "mode": "equal",
///     "interval_secs": 10
///   },
///   "result": { "url": "https://jobs.example/jobs/7/result" },
///   "headers": { "Authorization": "Bearer <token>" }
/// }
/// ```
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("usage: poll <model.json>"))?;
    let model = RequestModel::from_json(&std::fs::read_to_string(path)?)?;

    let options = ClientOptions::from_env().map_err(anyhow::Error::msg)?;
    let poller = RequestPoller::with_executor(model, HttpExecutor::with_options(options)?);

    let value: serde_json::Value = poller.start().await?;
    println!("{}", serde_json::to_string_pretty(&value)?);

    Ok(())
}
