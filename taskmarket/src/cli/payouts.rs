use anyhow::{anyhow, Result};
use clap::{value_parser, Arg, ArgMatches, Command};

use crate::cli::utils::{admin_password, connect, optional_datetime, string_arg, timestamp_to_string};
use crate::market_rpc::rpc::MarketServiceClient;
use crate::models::{Application, TreasuryPayout};
use crate::payout::PayoutIntent;
use crate::utils::short_msg;
use tabled::builder::Builder;
use tabled::settings::style::Style;

pub async fn payout_cmds<'a>() -> Command<'a> {
    Command::new("payout")
        .arg_required_else_help(true)
        .about("payout command")
        .subcommand(
            Command::new("history")
                .about("recent transfers sent by the treasury")
                .args(&[Arg::new("limit")
                    .long("limit")
                    .takes_value(true)
                    .value_parser(value_parser!(usize))
                    .help("number of transactions to inspect (max 100)")]),
        )
        .subcommand(Command::new("intents").about("payouts waiting for reconciliation (admin)"))
        .subcommand(
            Command::new("resolve")
                .about("settle an outstanding payout (admin): with --signature the payout is taken as done, without it the application can be reviewed again")
                .args(&[
                    Arg::new("id").index(1).required(true).help("application id"),
                    Arg::new("signature")
                        .long("signature")
                        .takes_value(true)
                        .help("confirmed transaction that paid the application"),
                ]),
        )
}

pub async fn payouts_command(payout_m: &&ArgMatches) -> Result<()> {
    match payout_m.subcommand() {
        Some(("history", ref sub_m)) => payout_history(sub_m).await,
        Some(("intents", ref sub_m)) => list_intents(sub_m).await,
        Some(("resolve", ref sub_m)) => resolve_payout(sub_m).await,
        _ => Err(anyhow!("command not found")),
    }
}

pub async fn payout_history(sub_m: &&ArgMatches) -> Result<()> {
    let limit = sub_m.get_one::<usize>("limit").copied();
    let server_api = connect(sub_m).await?;
    print_history(server_api.list_treasury_payouts(limit).await?)
}

pub async fn list_intents(sub_m: &&ArgMatches) -> Result<()> {
    let password = admin_password(sub_m)?;
    let server_api = connect(sub_m).await?;
    print_intents(server_api.admin_list_payout_intents(password).await?)
}

pub async fn resolve_payout(sub_m: &&ArgMatches) -> Result<()> {
    let password = admin_password(sub_m)?;
    let id = string_arg(sub_m, "id")?;
    let signature = sub_m.get_one::<String>("signature").cloned();
    let server_api = connect(sub_m).await?;
    let application: Application = server_api.admin_resolve_payout(password, id, signature).await?;
    println!(
        "application {} is {} (paid at: {})",
        application.id,
        application.status,
        optional_datetime(&application.paid_at)
    );
    Ok(())
}

fn print_history(payouts: Vec<TreasuryPayout>) -> Result<()> {
    let mut builder = Builder::new();

    builder.set_header(["Signature", "To", "Amount", "Time", "Status"]);
    for payout in payouts {
        builder.push_record([
            payout.signature.as_str(),
            payout.to.as_str(),
            payout.amount.to_string().as_str(),
            payout.timestamp.map(timestamp_to_string).unwrap_or_default().as_str(),
            payout.status.to_string().as_str(),
        ]);
    }
    println!("{}", builder.build().with(Style::ascii()));
    Ok(())
}

fn print_intents(intents: Vec<PayoutIntent>) -> Result<()> {
    let mut builder = Builder::new();

    builder.set_header([
        "ApplicationId",
        "TaskId",
        "Wallet",
        "Amount",
        "State",
        "Signature",
        "Err",
        "CreateAt",
        "UpdateAt",
    ]);
    for intent in intents {
        builder.push_record([
            intent.application_id.as_str(),
            intent.task_id.as_str(),
            intent.wallet_address.as_str(),
            intent.amount.to_string().as_str(),
            intent.state.to_string().as_str(),
            intent.tx_signature.as_str(),
            short_msg(&intent.error_msg, 30).as_str(),
            timestamp_to_string(intent.create_at).as_str(),
            timestamp_to_string(intent.update_at).as_str(),
        ]);
    }
    println!("{}", builder.build().with(Style::ascii()));
    Ok(())
}
