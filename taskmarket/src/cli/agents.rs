use anyhow::{anyhow, Result};
use clap::{Arg, ArgMatches, Command};

use crate::cli::utils::{admin_password, connect, datetime_to_string, string_arg};
use crate::market_rpc::rpc::MarketServiceClient;
use crate::models::Agent;
use tabled::builder::Builder;
use tabled::settings::style::Style;

pub async fn agent_cmds<'a>() -> Command<'a> {
    Command::new("agent")
        .arg_required_else_help(true)
        .about("agent command (admin)")
        .subcommand(Command::new("list").about("list registered agents"))
        .subcommand(
            Command::new("activate")
                .about("allow an agent to use its api key again")
                .args(&[Arg::new("id").index(1).required(true).help("agent id")]),
        )
        .subcommand(
            Command::new("deactivate")
                .about("block an agent's api key")
                .args(&[Arg::new("id").index(1).required(true).help("agent id")]),
        )
}

pub async fn agents_command(agent_m: &&ArgMatches) -> Result<()> {
    match agent_m.subcommand() {
        Some(("list", ref sub_m)) => list_agents(sub_m).await,
        Some(("activate", ref sub_m)) => set_agent_active(sub_m, true).await,
        Some(("deactivate", ref sub_m)) => set_agent_active(sub_m, false).await,
        _ => Err(anyhow!("command not found")),
    }
}

pub async fn list_agents(sub_m: &&ArgMatches) -> Result<()> {
    let password = admin_password(sub_m)?;
    let server_api = connect(sub_m).await?;
    print_agents(server_api.admin_list_agents(password).await?)
}

pub async fn set_agent_active(sub_m: &&ArgMatches, active: bool) -> Result<()> {
    let password = admin_password(sub_m)?;
    let id = string_arg(sub_m, "id")?;
    let server_api = connect(sub_m).await?;
    let agent = server_api.admin_set_agent_active(password, id, active).await?;
    print_agents(vec![agent])
}

fn print_agents(agents: Vec<Agent>) -> Result<()> {
    let mut builder = Builder::new();

    builder.set_header([
        "Id",
        "Name",
        "Wallet",
        "ApiKey",
        "Active",
        "TasksCreated",
        "Paid",
        "CreatedAt",
    ]);

    for agent in agents {
        builder.push_record([
            agent.id.as_str(),
            agent.name.as_str(),
            agent.wallet_address.as_str(),
            agent.api_key.as_str(),
            agent.active.to_string().as_str(),
            agent.tasks_created.to_string().as_str(),
            agent.payment_amount.to_string().as_str(),
            datetime_to_string(&agent.created_at).as_str(),
        ]);
    }
    println!("{}", builder.build().with(Style::ascii()));
    Ok(())
}
