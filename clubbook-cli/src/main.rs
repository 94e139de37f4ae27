use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use clubbook_lib::{
  backup, compute_period, generate_invoices_in_background, Config, Customer, InvoiceBuilder,
  InvoiceStatus, PdfInvoiceBuilder, Repository, Weekday,
};
use time::macros::format_description;
use time::{Date, OffsetDateTime, Time};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "clubbook")]
struct Cli {
  /// Configuration file (defaults to clubbook.json next to the executable).
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List customers.
  Customers {
    #[arg(long)]
    json: bool,
  },

  AddCustomer {
    #[arg(long)]
    name: String,
    /// Customer number; allocated from the counter when omitted.
    #[arg(long)]
    number: Option<u32>,
    #[arg(long, default_value = "")]
    address: String,
    #[arg(long, default_value = "")]
    postal_code: String,
    #[arg(long, default_value = "")]
    city: String,
    #[arg(long, default_value = "")]
    phone: String,
    #[arg(long, default_value = "")]
    email: String,
    #[arg(long)]
    company: bool,
  },

  DeleteCustomer {
    #[arg(long)]
    id: Uuid,
  },

  AddSubscription {
    #[arg(long)]
    id: Uuid,
    #[arg(long)]
    track: u32,
    /// MONDAY..SUNDAY or the first three letters.
    #[arg(long)]
    weekday: String,
    /// HH:MM
    #[arg(long)]
    time: String,
  },

  GenerateInvoices {
    #[arg(long)]
    due_days: Option<u32>,
    /// Bill the next period instead of the current one.
    #[arg(long)]
    next: bool,
    /// Issue date (YYYY-MM-DD), defaults to today.
    #[arg(long)]
    date: Option<String>,
  },

  SetStatus {
    #[arg(long)]
    id: Uuid,
    #[arg(long)]
    invoice: u32,
    #[arg(long)]
    status: String,
  },

  /// Show the billing period for a date.
  Period {
    #[arg(long)]
    date: Option<String>,
    #[arg(long)]
    next: bool,
    #[arg(long)]
    months: Option<u8>,
  },

  Backups,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

  let cli = Cli::parse();
  let config = Config::load(cli.config.as_deref()).context("reading configuration")?;

  match cli.command {
    Command::Period { date, next, months } => {
      let reference = parse_date_or_today(date.as_deref())?;
      let months = months.unwrap_or(config.period_length_months);
      let p = compute_period(reference, months, next)?;
      println!("{} .. {}", p.start_day, p.end_day);
    }

    Command::Backups => {
      let paths = config.resolve_paths()?;
      for path in backup::list_backups(&paths.backup_dir)? {
        println!("{}", path.display());
      }
    }

    Command::Customers { json } => {
      let customers = load_repo(&config)?.customers()?;
      if json {
        println!("{}", serde_json::to_string_pretty(&customers)?);
      } else {
        for c in &customers {
          print_customer(c);
        }
      }
    }

    Command::AddCustomer {
      name,
      number,
      address,
      postal_code,
      city,
      phone,
      email,
      company,
    } => {
      let repo = load_repo(&config)?;
      let mut c = repo.create_customer();
      c.customer_number = match number {
        Some(n) => n,
        None => repo.new_customer_number()?,
      };
      c.info.name = name;
      c.info.address = address;
      c.info.postal_code = postal_code;
      c.info.city = city;
      c.info.phone = phone;
      c.info.email = email;
      c.info.is_company = company;
      let id = c.id;
      let customer_number = c.customer_number;
      repo.save_customer(c)?;
      println!("{} #{}", id, customer_number);
    }

    Command::DeleteCustomer { id } => {
      if !load_repo(&config)?.delete_customer(&id)? {
        log::warn!("no customer with id {id}");
      }
    }

    Command::AddSubscription {
      id,
      track,
      weekday,
      time,
    } => {
      let repo = load_repo(&config)?;
      let mut c = repo
        .get_customer(&id)?
        .ok_or_else(|| anyhow::anyhow!("no customer with id {id}"))?;
      let mut s = repo.create_subscription();
      s.track_number = track;
      s.weekday =
        Weekday::parse(&weekday).ok_or_else(|| anyhow::anyhow!("invalid weekday {weekday:?}"))?;
      s.start_time = Time::parse(&time, format_description!("[hour]:[minute]"))
        .map_err(|e| anyhow::anyhow!("invalid time {time:?}: {e}"))?;
      c.subscriptions.push(s);
      repo.save_customer(c)?;
    }

    Command::GenerateInvoices {
      due_days,
      next,
      date,
    } => {
      let repo = load_repo(&config)?;
      let issue_date = parse_date_or_today(date.as_deref())?;
      let builder: Arc<dyn InvoiceBuilder> = Arc::new(PdfInvoiceBuilder::new(&config, issue_date));
      let due_days = due_days.unwrap_or(config.default_due_days);
      let report = generate_invoices_in_background(repo.clone(), builder, due_days, next)
        .await
        .context("generating invoices")?;

      for f in &report.files {
        println!("{}", repo.paths().data_dir.join(f).display());
      }
      for c in &report.empty_invoice_customers {
        eprintln!(
          "warning: invoice for #{} {} covers no subscriptions",
          c.customer_number,
          c.display_name()
        );
      }
    }

    Command::SetStatus {
      id,
      invoice,
      status,
    } => {
      let status =
        InvoiceStatus::parse(&status).ok_or_else(|| anyhow::anyhow!("invalid status {status:?}"))?;
      if !load_repo(&config)?.set_invoice_status(&id, invoice, status)? {
        anyhow::bail!("customer {id} has no invoice {invoice}");
      }
    }
  }

  Ok(())
}

/// A damaged data file stops the command here, before anything is changed.
fn load_repo(config: &Config) -> anyhow::Result<Arc<Repository>> {
  Ok(Arc::new(
    Repository::load(config).context("loading customer data")?,
  ))
}

fn print_customer(c: &Customer) {
  println!(
    "#{:<6} {}  {}  {} subscription(s), {} invoice(s)",
    c.customer_number,
    c.id,
    c.display_name(),
    c.subscriptions.len(),
    c.invoices.len()
  );
}

fn parse_date_or_today(raw: Option<&str>) -> anyhow::Result<Date> {
  match raw {
    Some(s) => Date::parse(s.trim(), format_description!("[year]-[month]-[day]"))
      .map_err(|e| anyhow::anyhow!("invalid date {s:?}: {e}")),
    None => Ok(
      OffsetDateTime::now_local()
        .unwrap_or_else(|_| OffsetDateTime::now_utc())
        .date(),
    ),
  }
}
