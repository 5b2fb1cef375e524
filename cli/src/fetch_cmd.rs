use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use clap::Parser;
use serde_json::Value;
use serde_json::json;
use tracing::warn;

use crate::CommandContext;
use crate::input::RequestInput;
use crate::print_json;

#[derive(Debug, Parser)]
pub struct FetchArgs {
    /// JSON request description (prefetch, execute, targetParameters,
    /// identity, lifecycle, device).
    #[arg(long = "input", value_name = "FILE")]
    input: PathBuf,

    /// Render pretty JSON instead of a single line.
    #[arg(long = "pretty", default_value_t = false)]
    pretty: bool,
}

pub(crate) async fn prefetch(context: &CommandContext, args: FetchArgs) -> Result<()> {
    let input = RequestInput::load(&args.input)?;
    let mut client = context.client(input.device.clone())?;
    client
        .prefetch_content(&input.prefetch, input.parameters.as_ref(), input.shared())
        .await
        .context("prefetch failed")?;

    let mut names: Vec<&str> = client
        .state()
        .prefetched_mboxes()
        .keys()
        .map(String::as_str)
        .collect();
    names.sort_unstable();
    let summary = json!({
        "prefetched": names,
        "tntId": client.tnt_id(),
        "sessionId": client.session_id(),
    });
    print_json(&summary, args.pretty)
}

/// Prefetch failures only log: every execute mbox still resolves, to its
/// default content at worst.
pub(crate) async fn execute(context: &CommandContext, args: FetchArgs) -> Result<()> {
    let input = RequestInput::load(&args.input)?;
    if input.execute.is_empty() {
        bail!("no execute mboxes in {}", args.input.display());
    }
    let mut client = context.client(input.device.clone())?;

    let prefetched = if input.prefetch.is_empty() {
        Ok(())
    } else {
        client
            .prefetch_content(&input.prefetch, input.parameters.as_ref(), input.shared())
            .await
    };
    if let Err(err) = prefetched {
        warn!("Prefetch failed, executing every mbox: {err}");
    }

    let results = client
        .load_requests(&input.execute, input.parameters.as_ref(), input.shared())
        .await;
    let mboxes: Vec<Value> = input
        .execute
        .iter()
        .zip(results)
        .map(|(request, content)| {
            json!({
                "name": request.name,
                "content": content.content,
                "a4tPayload": content.a4t_payload,
                "responseTokens": content.response_tokens,
                "clickMetricA4tPayload": content.click_metric_a4t_payload,
            })
        })
        .collect();
    print_json(&json!({ "mboxes": mboxes }), args.pretty)
}
