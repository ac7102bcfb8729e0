use anyhow::Context;
use crossterm::style::{style, Color, Stylize};
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use regconsole::model::{AccountPage, AccountRef, AccountStatus, SortField, SortOrder};
use regconsole::notice::NoticeLevel;
use regconsole::tools::{mask_username, usage_progress};
use regconsole::{Dashboard, DashboardEvent, EventReceiver, HttpGateway, Settings, View};

#[derive(Debug, PartialEq)]
enum Command {
    Start,
    Stop,
    Custom(String),
    Code { id: String, code: String },
    Cancel,
    Page(u32),
    PerPage(u32),
    Sort(SortField, SortOrder),
    Search(String),
    View(View),
    Refresh,
    Status(AccountRef, AccountStatus),
    Delete(AccountRef),
    Usage(String),
    UseToken(i64),
    Copy(i64),
    Config,
    Export(String),
    Import(String),
    Restart,
    ResetMachine,
    Help,
    Quit,
}

fn parse_number<T: FromStr>(value: Option<&str>, what: &str) -> Result<T, String> {
    value
        .ok_or_else(|| format!("missing {}", what))?
        .parse()
        .map_err(|_| format!("invalid {}", what))
}

fn required(value: Option<&str>, what: &str) -> Result<String, String> {
    value
        .map(str::to_string)
        .ok_or_else(|| format!("missing {}", what))
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        let name = parts.next().unwrap_or_default();
        let command = match name {
            "start" => Command::Start,
            "stop" => Command::Stop,
            "custom" => Command::Custom(required(parts.next(), "email")?),
            "code" => Command::Code {
                id: required(parts.next(), "request id")?,
                code: required(parts.next(), "code")?,
            },
            "cancel" => Command::Cancel,
            "page" => Command::Page(parse_number(parts.next(), "page")?),
            "per-page" => Command::PerPage(parse_number(parts.next(), "page size")?),
            "sort" => {
                let field = required(parts.next(), "sort field")?.parse()?;
                let order = match parts.next() {
                    Some(order) => order.parse()?,
                    None => SortOrder::Desc,
                };
                Command::Sort(field, order)
            }
            "search" => Command::Search(parts.collect::<Vec<_>>().join(" ")),
            "view" => Command::View(match parts.next() {
                Some("accounts") => View::Accounts,
                Some("config") => View::Config,
                Some(_) => View::Other,
                None => return Err("missing view".to_string()),
            }),
            "refresh" => Command::Refresh,
            "status" => Command::Status(
                required(parts.next(), "account")?.parse()?,
                required(parts.next(), "status")?.parse()?,
            ),
            "delete" => Command::Delete(required(parts.next(), "account")?.parse()?),
            "usage" => Command::Usage(required(parts.next(), "email")?),
            "use-token" => Command::UseToken(parse_number(parts.next(), "account id")?),
            "copy" => Command::Copy(parse_number(parts.next(), "account id")?),
            "config" => Command::Config,
            "export" => Command::Export(required(parts.next(), "path")?),
            "import" => Command::Import(required(parts.next(), "path")?),
            "restart" => Command::Restart,
            "reset-machine" => Command::ResetMachine,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => return Err(format!("unknown command: {}", other)),
        };
        Ok(command)
    }
}

const HELP: &str = "\
start | stop | custom <email> | code <id> <code> | cancel
page <n> | per-page <n> | sort <created_at|email|usage_limit> [asc|desc] | search [term]
view <accounts|config|other> | refresh
status <id|email> <active|disabled|deleted> | delete <id|email>
usage <email> | use-token <id> | copy <id>
config | export <path> | import <path> | restart | reset-machine | quit";

fn print_page(page: &AccountPage) {
    let p = &page.pagination;
    println!(
        "{}",
        style(format!(
            "-- page {}/{} ({} accounts) --",
            p.page, p.total_pages, p.total_count
        ))
        .bold()
    );
    for account in &page.data {
        let progress = usage_progress(account.usage_limit.unwrap_or(0));
        println!(
            "{:>5}  {:<32} {:<8} {:>3}/{} {:>3}%  {}",
            account.id.map(|id| id.to_string()).unwrap_or_default(),
            mask_username(&account.email),
            account.status.label(),
            progress.remaining,
            progress.total,
            progress.percent,
            account.created_at.as_deref().unwrap_or("-"),
        );
    }
}

fn print_event(event: DashboardEvent) {
    match event {
        DashboardEvent::Notice(notice) => {
            let color = match notice.level {
                NoticeLevel::Success => Color::Green,
                NoticeLevel::Info => Color::Cyan,
                NoticeLevel::Warning => Color::Yellow,
                NoticeLevel::Danger => Color::Red,
            };
            println!("{}", style(notice.text).with(color));
        }
        DashboardEvent::StatusUpdated(view) => println!(
            "[{}] {} | {}/{} slots used, {} left ({}%) | last {} next {} | runs {} ok {} failed {} ({})",
            view.label,
            view.message,
            view.active_count,
            view.max_accounts,
            view.remaining,
            view.usage_percent,
            view.last_run,
            view.next_run,
            view.total_runs,
            view.successful_runs,
            view.failed_runs,
            view.success_rate,
        ),
        DashboardEvent::AccountsUpdated(page) => print_page(&page),
        DashboardEvent::PromptOpened(prompt) => {
            println!("{}", style(&prompt.title).bold().with(Color::Magenta));
            println!("{}", prompt.body);
            println!("  -> code {} <code>", prompt.id);
        }
        DashboardEvent::PromptClosed { id } => log::debug!("prompt {} closed", id),
        DashboardEvent::Refreshed(at) => log::debug!("refreshed at {}", at.format("%H:%M:%S")),
        DashboardEvent::Busy(_) | DashboardEvent::CustomInputCleared => {}
    }
}

async fn print_events(mut rx: EventReceiver) {
    while let Some(event) = rx.recv().await {
        print_event(event);
    }
}

async fn run(dashboard: Arc<Dashboard<HttpGateway>>, command: Command) {
    // 失败已经通过事件提示过，这里只丢弃结果
    match command {
        Command::Start => {
            let _ = dashboard.start_task().await;
        }
        Command::Stop => {
            let _ = dashboard.stop_task().await;
        }
        Command::Custom(email) => {
            let _ = dashboard.start_custom(&email).await;
        }
        Command::Code { id, code } => {
            let _ = dashboard.submit_code(&id, &code).await;
        }
        Command::Cancel => dashboard.cancel_verification().await,
        Command::Page(page) => {
            let _ = dashboard.set_page(page).await;
        }
        Command::PerPage(per_page) => {
            let _ = dashboard.set_per_page(per_page).await;
        }
        Command::Sort(field, order) => {
            let _ = dashboard.set_sort(field, order).await;
        }
        Command::Search(term) => {
            let _ = dashboard.set_search(&term).await;
        }
        Command::View(view) => {
            dashboard.set_active_view(view);
            if view == View::Config {
                show_config(&dashboard).await;
            }
        }
        Command::Refresh => {
            let _ = dashboard.force_refresh().await;
        }
        Command::Status(target, status) => {
            let _ = dashboard.update_account_status(&target, status).await;
        }
        Command::Delete(target) => {
            let _ = dashboard.delete_account(&target).await;
        }
        Command::Usage(email) => {
            dashboard.set_modal_visible(true);
            if let Ok(report) = dashboard.account_usage(&email).await {
                let usage = &report.usage;
                println!(
                    "{}: {}/{} used, {} left, {} days, {}",
                    report.email,
                    usage.used_limit,
                    usage.total_limit,
                    usage.remaining_balance.unwrap_or(0.0),
                    usage.remaining_days.unwrap_or(0.0),
                    usage.status,
                );
                if report.db_updated {
                    let remaining = (usage.total_limit - usage.used_limit).max(0.0) as i64;
                    let _ = dashboard.update_usage_limit(&report.email, remaining).await;
                }
            }
            dashboard.set_modal_visible(false);
        }
        Command::UseToken(id) => {
            let _ = dashboard.use_token(id).await;
        }
        Command::Copy(id) => {
            if let Ok(token) = dashboard.copy_token(id) {
                println!("{}", token);
            }
        }
        Command::Config => show_config(&dashboard).await,
        Command::Export(path) => {
            let _ = dashboard.export_accounts(path).await;
        }
        Command::Import(path) => {
            let _ = dashboard.import_accounts(path).await;
        }
        Command::Restart => {
            let _ = dashboard.restart_service().await;
        }
        Command::ResetMachine => {
            let _ = dashboard.reset_machine().await;
        }
        Command::Help | Command::Quit => {}
    }
}

async fn show_config(dashboard: &Dashboard<HttpGateway>) {
    if let Ok(config) = dashboard.load_config().await {
        match serde_yaml::to_string(&config) {
            Ok(text) => println!("{}", text),
            Err(err) => log::warn!("failed to render config: {}", err),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("regconsole=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "settings.yaml".to_string());
    let settings = Settings::load(&path)?;
    let gateway = HttpGateway::new(&settings.base_url)
        .context("failed to create http gateway")?
        .with_config_method(settings.config_save_method);
    log::info!("connecting to {}", settings.base_url);

    let (dashboard, rx) = Dashboard::create(Arc::new(gateway), settings);
    let dashboard = Arc::new(dashboard);
    let printer = tokio::spawn(print_events(rx));
    dashboard.start().await;
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.parse::<Command>() {
            Ok(Command::Quit) => break,
            Ok(Command::Help) => println!("{}", HELP),
            // 自定义注册会一直等到验证码提交，所以每条命令单独跑
            Ok(command) => {
                tokio::spawn(run(dashboard.clone(), command));
            }
            Err(err) => println!("{}", style(err).with(Color::Yellow)),
        }
    }

    dashboard.stop();
    drop(dashboard);
    printer.abort();
    log::info!("bye");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            "code v1 123456".parse::<Command>(),
            Ok(Command::Code {
                id: "v1".into(),
                code: "123456".into()
            })
        );
        assert_eq!(
            "sort usage_limit asc".parse::<Command>(),
            Ok(Command::Sort(SortField::UsageLimit, SortOrder::Asc))
        );
        assert_eq!(
            "status 12 disabled".parse::<Command>(),
            Ok(Command::Status(AccountRef::Id(12), AccountStatus::Disabled))
        );
        assert_eq!(
            "delete a@b.io".parse::<Command>(),
            Ok(Command::Delete(AccountRef::Email("a@b.io".into())))
        );
        assert_eq!(
            "search foo bar".parse::<Command>(),
            Ok(Command::Search("foo bar".into()))
        );
        assert_eq!("search".parse::<Command>(), Ok(Command::Search(String::new())));
    }

    #[test]
    fn test_parse_errors() {
        assert!("page".parse::<Command>().is_err());
        assert!("page two".parse::<Command>().is_err());
        assert!("sort name".parse::<Command>().is_err());
        assert!("frobnicate".parse::<Command>().is_err());
    }
}
