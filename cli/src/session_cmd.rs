use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use delivery_core::DeliveryClient;
use delivery_core::services::DeviceContext;
use serde_json::Value;
use serde_json::json;

use crate::CommandContext;
use crate::print_json;

#[derive(Debug, Parser)]
pub struct SessionCli {
    #[command(subcommand)]
    command: SessionCommand,
}

#[derive(Debug, Subcommand)]
enum SessionCommand {
    /// Print the persisted identifiers and the current session id.
    Show {
        #[arg(long = "pretty", default_value_t = false)]
        pretty: bool,
    },
    /// Overwrite persisted identifiers. Ignored while opted out.
    Set {
        #[arg(long = "tnt-id", value_name = "ID")]
        tnt_id: Option<String>,
        #[arg(long = "third-party-id", value_name = "ID")]
        third_party_id: Option<String>,
        #[arg(long = "session-id", value_name = "ID")]
        session_id: Option<String>,
    },
    /// Forget every identifier and the current session.
    Reset,
}

pub(crate) fn run(context: &CommandContext, cli: SessionCli) -> Result<()> {
    let client = context.client(DeviceContext::default())?;
    match cli.command {
        SessionCommand::Show { pretty } => print_json(&describe(&client), pretty),
        SessionCommand::Set {
            tnt_id,
            third_party_id,
            session_id,
        } => {
            if let Some(tnt_id) = tnt_id {
                client.set_tnt_id(Some(&tnt_id));
            }
            if let Some(third_party_id) = third_party_id {
                client.set_third_party_id(Some(&third_party_id));
            }
            if let Some(session_id) = session_id {
                client.set_session_id(Some(&session_id));
            }
            Ok(())
        }
        SessionCommand::Reset => {
            client.reset_experience();
            Ok(())
        }
    }
}

fn describe(client: &DeliveryClient) -> Value {
    json!({
        "tntId": client.tnt_id(),
        "thirdPartyId": client.third_party_id(),
        "edgeHost": client.state().edge_host(),
        "sessionId": client.session_id(),
    })
}
