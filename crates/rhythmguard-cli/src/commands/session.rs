use clap::Subcommand;
use rhythmguard_core::{EnforcementScheduler, Questionnaire, SessionKind, StartRequest};
use serde::Serialize;

use crate::common::{Context, GateMode};

#[derive(Subcommand)]
pub enum SessionAction {
    /// Start a session (focused, personal or gated)
    Start {
        kind: SessionKind,
        /// What this session is for
        #[arg(long)]
        intention: Option<String>,
        /// External priority reference (required for focused sessions)
        #[arg(long)]
        priority: Option<String>,
        /// Length in minutes (gated sessions only)
        #[arg(long)]
        minutes: Option<u32>,
    },
    /// Complete the active session and arm the break
    Complete {
        #[arg(long)]
        distractions: Option<u32>,
        #[arg(long)]
        completed_goal: Option<bool>,
        #[arg(long)]
        rabbit_hole: Option<bool>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Drop the active session without a break
    Abandon,
    /// Print the active session as JSON
    Status,
    /// Check whether a session may start now
    CanStart {
        #[arg(long)]
        kind: Option<SessionKind>,
    },
    /// List today's sessions
    Today,
    /// Run one enforcement sweep and exit
    Sweep,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn run(ctx: &Context, action: SessionAction) -> anyhow::Result<()> {
    let config = ctx.load_config()?;
    let mode = match action {
        SessionAction::Start { kind, .. } if kind.is_gated() => GateMode::Live,
        SessionAction::Complete { .. } | SessionAction::Abandon | SessionAction::Sweep => {
            GateMode::Live
        }
        _ => GateMode::Offline,
    };
    let machine = ctx.machine(&config, mode)?;

    match action {
        SessionAction::Start {
            kind,
            intention,
            priority,
            minutes,
        } => {
            let request = StartRequest {
                kind,
                intention,
                priority_ref: priority,
                planned_minutes: minutes,
            };
            let session = machine.start(request).await?;
            eprintln!(
                "Session started: {} ({}, {} min)",
                session.id, session.kind, session.planned_minutes
            );
            print_json(&session)?;
        }
        SessionAction::Complete {
            distractions,
            completed_goal,
            rabbit_hole,
            notes,
        } => {
            let answers = Questionnaire {
                distractions,
                completed_goal,
                went_down_rabbit_hole: rabbit_hole,
                notes,
            };
            let result = machine.complete_current(answers).await?;
            if let Some(err) = &result.gate_error {
                eprintln!("warning: re-blocking failed: {err}");
            }
            print_json(&result)?;
        }
        SessionAction::Abandon => {
            let session = machine.abandon().await?;
            eprintln!("Session abandoned: {}", session.id);
        }
        SessionAction::Status => {
            print_json(&machine.current().await?)?;
        }
        SessionAction::CanStart { kind } => {
            print_json(&machine.can_start(kind).await?)?;
        }
        SessionAction::Today => {
            print_json(&machine.today().await?)?;
        }
        SessionAction::Sweep => {
            let report = EnforcementScheduler::new(machine, &config.scheduler)
                .sweep_once()
                .await?;
            print_json(&report.completed)?;
            if report.failed > 0 {
                anyhow::bail!("{} forced completion(s) failed", report.failed);
            }
        }
    }
    Ok(())
}
