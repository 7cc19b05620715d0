use anyhow::{anyhow, Result};
use clap::{Arg, ArgMatches, Command};

use crate::cli::utils::{admin_password, connect, datetime_to_string, optional_datetime, string_arg};
use crate::market_rpc::rpc::MarketServiceClient;
use crate::models::{Application, ApplicationStatus, ReviewDecision};
use crate::utils::short_msg;
use tabled::builder::Builder;
use tabled::settings::style::Style;

pub async fn application_cmds<'a>() -> Command<'a> {
    Command::new("application")
        .arg_required_else_help(true)
        .about("application command (admin)")
        .subcommand(
            Command::new("list").about("list submitted applications").args(&[
                Arg::new("status")
                    .long("status")
                    .takes_value(true)
                    .help("pending, approved or rejected"),
                Arg::new("task")
                    .long("task")
                    .takes_value(true)
                    .help("only applications of this task"),
            ]),
        )
        .subcommand(
            Command::new("approve")
                .about("approve an application and pay the task reward")
                .args(&[Arg::new("id").index(1).required(true).help("application id")]),
        )
        .subcommand(
            Command::new("reject")
                .about("reject an application")
                .args(&[Arg::new("id").index(1).required(true).help("application id")]),
        )
}

pub async fn applications_command(app_m: &&ArgMatches) -> Result<()> {
    match app_m.subcommand() {
        Some(("list", ref sub_m)) => list_applications(sub_m).await,
        Some(("approve", ref sub_m)) => review_application(sub_m, ReviewDecision::Approve).await,
        Some(("reject", ref sub_m)) => review_application(sub_m, ReviewDecision::Reject).await,
        _ => Err(anyhow!("command not found")),
    }
}

pub async fn list_applications(sub_m: &&ArgMatches) -> Result<()> {
    let password = admin_password(sub_m)?;
    let status = sub_m
        .get_one::<String>("status")
        .map(|s| s.parse::<ApplicationStatus>())
        .transpose()?;
    let task_id = sub_m.get_one::<String>("task").cloned();

    let server_api = connect(sub_m).await?;
    let applications = server_api
        .admin_list_applications(password, status, task_id)
        .await?;
    print_applications(applications)
}

pub async fn review_application(sub_m: &&ArgMatches, decision: ReviewDecision) -> Result<()> {
    let password = admin_password(sub_m)?;
    let id = string_arg(sub_m, "id")?;
    let server_api = connect(sub_m).await?;
    let application = server_api
        .admin_review_application(password, id, decision)
        .await?;
    print_applications(vec![application])
}

fn print_applications(applications: Vec<Application>) -> Result<()> {
    let mut builder = Builder::new();

    builder.set_header([
        "Id",
        "Task",
        "Wallet",
        "Proof",
        "Status",
        "SubmittedAt",
        "ReviewedAt",
        "TxSignature",
    ]);

    for application in applications {
        builder.push_record([
            application.id.as_str(),
            short_msg(&application.task_title, 20).as_str(),
            application.wallet_address.as_str(),
            short_msg(&application.proof_content, 30).as_str(),
            application.status.to_string().as_str(),
            datetime_to_string(&application.submitted_at).as_str(),
            optional_datetime(&application.reviewed_at).as_str(),
            application.tx_signature.as_deref().unwrap_or(""),
        ]);
    }
    println!("{}", builder.build().with(Style::ascii()));
    Ok(())
}
