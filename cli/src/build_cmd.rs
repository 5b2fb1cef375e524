use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use crate::CommandContext;
use crate::input::RequestInput;
use crate::print_json;

#[derive(Debug, Parser)]
pub struct BuildArgs {
    /// JSON request description (prefetch, execute, targetParameters,
    /// identity, lifecycle, device).
    #[arg(long = "input", value_name = "FILE")]
    input: PathBuf,

    /// Render pretty JSON instead of a single line.
    #[arg(long = "pretty", default_value_t = false)]
    pretty: bool,
}

pub(crate) fn run(context: &CommandContext, args: BuildArgs) -> Result<()> {
    let input = RequestInput::load(&args.input)?;
    let client = context.client(input.device.clone())?;
    let payload = client.request_payload(
        &input.prefetch,
        &input.execute,
        input.parameters.as_ref(),
        input.shared(),
    );

    print_json(&payload, args.pretty)
}
