use clap::Subcommand;
use serde::Serialize;

use crate::common::{Context, GateMode};

#[derive(Subcommand)]
pub enum StateAction {
    /// Print break and evening-mode state as JSON
    Show,
    /// Leave evening mode
    Reset,
}

#[derive(Serialize)]
struct StateView {
    on_break: bool,
    remaining_seconds: i64,
    evening_mode: bool,
}

pub async fn run(ctx: &Context, action: StateAction) -> anyhow::Result<()> {
    let config = ctx.load_config()?;
    let machine = ctx.machine(&config, GateMode::Offline)?;

    match action {
        StateAction::Show => {
            let status = machine.break_status().await?;
            let state = machine.app_state().await?;
            let view = StateView {
                on_break: status.on_break,
                remaining_seconds: status.remaining_seconds,
                evening_mode: state.evening_mode,
            };
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        StateAction::Reset => {
            if machine.reset_evening_mode().await? {
                println!("evening mode cleared");
            } else {
                println!("evening mode was not set");
            }
        }
    }
    Ok(())
}
