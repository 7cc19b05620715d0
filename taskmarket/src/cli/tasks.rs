use anyhow::{anyhow, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};

use crate::cli::utils::{admin_password, connect, datetime_to_string, string_arg};
use crate::market_rpc::rpc::MarketServiceClient;
use crate::models::{Difficulty, NewTask, ProofType, Stats, Task, TaskPatch};
use crate::utils::short_msg;
use tabled::builder::Builder;
use tabled::settings::style::Style;

fn task_field_args<'a>(required: bool) -> Vec<Arg<'a>> {
    vec![
        Arg::new("title")
            .long("title")
            .takes_value(true)
            .required(required)
            .help("task title"),
        Arg::new("description")
            .long("description")
            .takes_value(true)
            .required(required)
            .help("what the worker has to do"),
        Arg::new("instructions")
            .long("instructions")
            .takes_value(true)
            .required(required)
            .help("how to submit the proof"),
        Arg::new("proof-type")
            .long("proof-type")
            .takes_value(true)
            .required(required)
            .help("tweet_link, image, link or text"),
        Arg::new("difficulty")
            .long("difficulty")
            .takes_value(true)
            .help("easy, medium or hard"),
        Arg::new("category")
            .long("category")
            .takes_value(true)
            .help("free form category"),
        Arg::new("max-completions")
            .long("max-completions")
            .takes_value(true)
            .value_parser(value_parser!(u32))
            .help("number of paid completions before the task is full"),
    ]
}

pub async fn task_cmds<'a>() -> Command<'a> {
    Command::new("task")
        .arg_required_else_help(true)
        .about("task command")
        .subcommand(
            Command::new("list")
                .about("list active tasks, or every task with --all")
                .args(&[Arg::new("all")
                    .long("all")
                    .action(ArgAction::SetTrue)
                    .help("include inactive tasks (admin)")]),
        )
        .subcommand(
            Command::new("get")
                .about("get task detail")
                .args(&[Arg::new("id").index(1).required(true).help("task id")]),
        )
        .subcommand(
            Command::new("create")
                .about("create a task (admin)")
                .args(task_field_args(true))
                .args(&[
                    Arg::new("reward")
                        .long("reward")
                        .takes_value(true)
                        .required(true)
                        .value_parser(value_parser!(f64))
                        .help("reward in SOL paid for each approved completion"),
                    Arg::new("inactive")
                        .long("inactive")
                        .action(ArgAction::SetTrue)
                        .help("create the task without listing it"),
                ]),
        )
        .subcommand(
            Command::new("update")
                .about("update a task (admin), the reward cannot change")
                .args(task_field_args(false))
                .args(&[
                    Arg::new("id").index(1).required(true).help("task id"),
                    Arg::new("active")
                        .long("active")
                        .takes_value(true)
                        .value_parser(value_parser!(bool))
                        .help("list (true) or unlist (false) the task"),
                ]),
        )
        .subcommand(
            Command::new("delete")
                .about("delete a task (admin)")
                .args(&[Arg::new("id").index(1).required(true).help("task id")]),
        )
}

pub async fn tasks_command(task_m: &&ArgMatches) -> Result<()> {
    match task_m.subcommand() {
        Some(("list", ref sub_m)) => list_tasks(sub_m).await,
        Some(("get", ref sub_m)) => get_task(sub_m).await,
        Some(("create", ref sub_m)) => create_task(sub_m).await,
        Some(("update", ref sub_m)) => update_task(sub_m).await,
        Some(("delete", ref sub_m)) => delete_task(sub_m).await,
        _ => Err(anyhow!("command not found")),
    }
}

pub async fn get_task(sub_m: &&ArgMatches) -> Result<()> {
    let id = string_arg(sub_m, "id")?;
    let server_api = connect(sub_m).await?;
    let task = server_api.get_task(id).await?;
    print_one_task(task)
}

pub async fn list_tasks(sub_m: &&ArgMatches) -> Result<()> {
    let server_api = connect(sub_m).await?;
    let tasks = if sub_m.get_one::<bool>("all").copied().unwrap_or(false) {
        server_api.admin_list_tasks(admin_password(sub_m)?).await?
    } else {
        server_api.list_active_tasks().await?
    };
    print_tasks(tasks)
}

fn parse_opt<T>(sub_m: &ArgMatches, name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr<Err = anyhow::Error>,
{
    sub_m
        .get_one::<String>(name)
        .map(|v| v.parse::<T>())
        .transpose()
}

pub async fn create_task(sub_m: &&ArgMatches) -> Result<()> {
    let password = admin_password(sub_m)?;
    let task = NewTask {
        title: string_arg(sub_m, "title")?,
        description: string_arg(sub_m, "description")?,
        instructions: string_arg(sub_m, "instructions")?,
        proof_type: parse_opt::<ProofType>(sub_m, "proof-type")?
            .ok_or_else(|| anyhow!("proof-type argument not found"))?,
        reward: sub_m
            .get_one::<f64>("reward")
            .copied()
            .ok_or_else(|| anyhow!("reward argument not found"))?,
        difficulty: parse_opt::<Difficulty>(sub_m, "difficulty")?.unwrap_or(Difficulty::Easy),
        category: sub_m.get_one::<String>("category").cloned().unwrap_or_default(),
        max_completions: sub_m.get_one::<u32>("max-completions").copied(),
        active: !sub_m.get_one::<bool>("inactive").copied().unwrap_or(false),
    };

    let server_api = connect(sub_m).await?;
    let task = server_api.admin_create_task(password, task).await?;
    print_one_task(task)
}

pub async fn update_task(sub_m: &&ArgMatches) -> Result<()> {
    let password = admin_password(sub_m)?;
    let id = string_arg(sub_m, "id")?;
    let patch = TaskPatch {
        title: sub_m.get_one::<String>("title").cloned(),
        description: sub_m.get_one::<String>("description").cloned(),
        instructions: sub_m.get_one::<String>("instructions").cloned(),
        proof_type: parse_opt::<ProofType>(sub_m, "proof-type")?,
        difficulty: parse_opt::<Difficulty>(sub_m, "difficulty")?,
        category: sub_m.get_one::<String>("category").cloned(),
        active: sub_m.get_one::<bool>("active").copied(),
        max_completions: sub_m.get_one::<u32>("max-completions").copied(),
    };
    if patch.is_empty() {
        return Err(anyhow!("nothing to update"));
    }

    let server_api = connect(sub_m).await?;
    let task = server_api.admin_update_task(password, id, patch).await?;
    print_one_task(task)
}

pub async fn delete_task(sub_m: &&ArgMatches) -> Result<()> {
    let password = admin_password(sub_m)?;
    let id = string_arg(sub_m, "id")?;
    let server_api = connect(sub_m).await?;
    server_api.admin_delete_task(password, id.clone()).await?;
    println!("task {} deleted", id);
    Ok(())
}

pub async fn stats_command(sub_m: &&ArgMatches) -> Result<()> {
    let server_api = connect(sub_m).await?;
    print_stats(server_api.get_stats().await?)
}

fn completions(task: &Task) -> String {
    match task.max_completions {
        Some(max) => format!("{}/{}", task.total_completions, max),
        None => format!("{}/-", task.total_completions),
    }
}

fn print_tasks(tasks: Vec<Task>) -> Result<()> {
    let mut builder = Builder::new();

    builder.set_header([
        "Id",
        "Title",
        "Reward",
        "Proof",
        "Difficulty",
        "Category",
        "Active",
        "Completions",
        "CreatedAt",
        "CreatedBy",
    ]);

    for task in tasks {
        builder.push_record([
            task.id.as_str(),
            short_msg(&task.title, 30).as_str(),
            task.reward.to_string().as_str(),
            task.proof_type.to_string().as_str(),
            task.difficulty.to_string().as_str(),
            task.category.as_str(),
            task.active.to_string().as_str(),
            completions(&task).as_str(),
            datetime_to_string(&task.created_at).as_str(),
            task.created_by.as_deref().unwrap_or("admin"),
        ]);
    }
    println!("{}", builder.build().with(Style::ascii()));
    Ok(())
}

fn print_one_task(task: Task) -> Result<()> {
    let mut table = Builder::new();

    table
        .set_header(["Name", "Value"])
        .push_record(["Id", task.id.as_str()])
        .push_record(["Title", task.title.as_str()])
        .push_record(["Description", task.description.as_str()])
        .push_record(["Instructions", task.instructions.as_str()])
        .push_record(["Proof", task.proof_type.to_string().as_str()])
        .push_record(["Reward", task.reward.to_string().as_str()])
        .push_record(["Difficulty", task.difficulty.to_string().as_str()])
        .push_record(["Category", task.category.as_str()])
        .push_record(["Active", task.active.to_string().as_str()])
        .push_record(["Completions", completions(&task).as_str()])
        .push_record(["CreatedAt", datetime_to_string(&task.created_at).as_str()])
        .push_record(["CreatedBy", task.created_by.as_deref().unwrap_or("admin")]);

    println!("{}", table.build().with(Style::ascii()));
    Ok(())
}

fn print_stats(stats: Stats) -> Result<()> {
    let mut table = Builder::new();

    table
        .set_header(["Name", "Value"])
        .push_record(["TotalTasks", stats.total_tasks.to_string().as_str()])
        .push_record(["TotalApplications", stats.total_applications.to_string().as_str()])
        .push_record(["TotalAgents", stats.total_agents.to_string().as_str()])
        .push_record(["TotalCompletedTasks", stats.total_completed_tasks.to_string().as_str()])
        .push_record(["TotalPayouts", stats.total_payouts.to_string().as_str()]);

    println!("{}", table.build().with(Style::ascii()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parses_task_create() {
        let m = task_cmds()
            .await
            .try_get_matches_from(vec![
                "task",
                "create",
                "--title",
                "t",
                "--description",
                "d",
                "--instructions",
                "i",
                "--proof-type",
                "tweet_link",
                "--reward",
                "0.05",
                "--max-completions",
                "3",
            ])
            .unwrap();
        let (name, sub_m) = m.subcommand().unwrap();
        assert_eq!(name, "create");
        assert_eq!(sub_m.get_one::<f64>("reward").copied(), Some(0.05));
        assert_eq!(sub_m.get_one::<u32>("max-completions").copied(), Some(3));
        assert_eq!(
            parse_opt::<ProofType>(sub_m, "proof-type").unwrap(),
            Some(ProofType::TweetLink)
        );
        assert_eq!(parse_opt::<Difficulty>(sub_m, "difficulty").unwrap(), None);
    }

    #[tokio::test]
    async fn update_requires_an_id() {
        assert!(task_cmds()
            .await
            .try_get_matches_from(vec!["task", "update", "--active", "false"])
            .is_err());
    }
}
