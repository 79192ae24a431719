//! # Tally Inventory
//!
//! A store-floor inventory CLI built on the Tally SDK. Every device holds its
//! own replica; quantities are PN-counters, so devices can count offline and
//! merge later without losing a single tap.
//!
//! ```text
//! inventories/<item id>
//!   title, detail   registers written once at seeding
//!   counter         PN-counter: Σ increments − Σ decrements over all devices
//! ```

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::*;
use tally_sdk::{
    Catalog, Inventory, InventoryConfig, ItemUpdateListener, SearchState, ViewItem,
};
use tally_store::{sync_pair, DocumentReplica, MemoryReplica, Predicate};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// ─── CLI ───────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "tally-inventory")]
#[command(about = "Replicated store-floor inventory (Tally SDK)")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// One device: seed, open the main list, count some items
    Demo {
        /// Device name used as replica id
        #[arg(long, default_value = "ipad-front")]
        device: String,
        /// Dump the replicated documents as JSON at the end
        #[arg(long)]
        json: bool,
    },
    /// Concurrent first launch on several devices, merged in different orders
    Conflict {
        #[arg(long, default_value_t = 3)]
        replicas: usize,
    },
    /// Devices split in two groups, count independently, then heal
    Partition,
    /// Interactive search screen with live results
    Search {
        #[arg(long, default_value = "ipad-front")]
        device: String,
        /// Quiet period before a typed query is issued, in milliseconds
        #[arg(long, default_value_t = 300)]
        debounce_ms: u64,
    },
}

// ─── Devices ───────────────────────────────────────────────────────────────

type Device = Inventory<MemoryReplica>;

/// A device replicating the whole inventory collection.
fn device(name: &str) -> Device {
    let replica = Arc::new(MemoryReplica::with_id(name));
    if let Err(e) = replica.register_subscription("inventories", &Predicate::All) {
        tracing::warn!(device = name, error = %e, "could not subscribe to inventories");
    }
    Inventory::with_defaults(replica)
}

/// Prints every view mutation of a screen.
struct ConsoleListener {
    label: String,
    rows: Vec<ViewItem>,
}

impl ConsoleListener {
    fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            rows: Vec::new(),
        }
    }
}

impl ItemUpdateListener for ConsoleListener {
    fn set_initial(&mut self, items: &[ViewItem]) {
        self.rows = items.to_vec();
        println!(
            "  {} {} list reset: {} item(s)",
            "↺".bright_cyan(),
            self.label.bright_magenta(),
            items.len()
        );
        for row in &self.rows {
            println!(
                "      {:<18} {:>4}",
                row.item.title,
                row.count.to_string().bright_white()
            );
        }
    }

    fn update_count(&mut self, index: usize, count: i64) {
        let title = self
            .rows
            .get(index)
            .map(|row| row.item.title.clone())
            .unwrap_or_default();
        if let Some(row) = self.rows.get_mut(index) {
            row.count = count;
        }
        println!(
            "  {} {} row {} ({}) → {}",
            "∆".bright_yellow(),
            self.label.bright_magenta(),
            index,
            title,
            count.to_string().bold()
        );
    }

    fn show_empty(&mut self) {
        println!("  {} {}", "∅".bright_yellow(), "No results".dimmed());
    }

    fn show_error(&mut self, message: &str) {
        println!("  {} {}", "!".bright_red(), message.bright_red());
    }
}

// ─── Pretty printing ──────────────────────────────────────────────────────

fn header(text: &str) {
    let bar = "═".repeat(60);
    println!("\n{}", bar.bright_cyan());
    println!("  {}", text.bold().bright_white());
    println!("{}", bar.bright_cyan());
}

fn section(text: &str) {
    println!("\n{} {}", "▸".bright_yellow(), text.bold());
}

fn step(text: &str) {
    println!("  {} {}", "•".bright_green(), text);
}

fn sync_arrow(a: &str, b: &str, changed: usize) {
    println!(
        "  {} {} {} {}",
        a.bright_magenta(),
        "◀─sync─▶".bright_cyan(),
        b.bright_magenta(),
        format!("({} document(s) changed)", changed).dimmed()
    );
}

fn show_device(device: &Device) {
    let border = "─".repeat(44);
    println!("  ┌{}┐", border);
    println!(
        "  │ {:^42} │",
        format!("Device: {}", device.replica().replica_id())
            .bright_yellow()
            .to_string()
    );
    println!("  ├{}┤", border);
    for item in device.catalog().items() {
        let line = format!(
            "{:<18} ${:>5.2}  qty {:>4}",
            item.title,
            item.price,
            device.count(item.id)
        );
        println!("  │ {:<42} │", line);
    }
    let docs = device.replica().documents(&device.config().collection).len();
    println!(
        "  │ {:<42} │",
        format!("{} document(s)", docs).dimmed().to_string()
    );
    println!("  └{}┘", border);
}

fn converged(devices: &[&Device]) -> bool {
    let Some((first, rest)) = devices.split_first() else {
        return true;
    };
    let collection = &first.config().collection;
    let reference = first.replica().documents(collection);
    rest.iter()
        .all(|d| d.replica().documents(collection) == reference)
}

fn convergence_result(ok: bool) {
    if ok {
        println!(
            "\n  {} {}",
            "✓".bright_green().bold(),
            "ALL DEVICES CONVERGED: one document per item, identical counts"
                .bright_green()
                .bold()
        );
    } else {
        println!(
            "\n  {} {}",
            "✗".bright_red().bold(),
            "DIVERGENCE DETECTED: devices differ!".bright_red().bold()
        );
    }
}

fn report_failure(what: &str, err: impl std::fmt::Display) {
    println!("  {} {}: {}", "!".bright_red(), what, err);
}

// ─── Demo ──────────────────────────────────────────────────────────────────

fn run_demo(name: &str, json: bool) {
    header("DEMO — Seed, Subscribe, Count");

    section("Phase 1: First launch seeds the store floor");
    let inventory = device(name);
    step(&format!(
        "device {} on tally-store {}",
        inventory.replica().replica_id(),
        inventory.replica().version()
    ));
    let mut screen = match inventory.start(ConsoleListener::new(name)) {
        Ok(screen) => screen,
        Err(e) => return report_failure("could not open the main list", e),
    };
    let report = screen.seed_report();
    step(&format!(
        "inserted {} item(s), {} already present",
        report.inserted.len(),
        report.existing.len()
    ));
    screen.drain();

    section("Phase 2: Counting");
    for (item, delta) in [(0, 3), (2, 1), (4, -1)] {
        for _ in 0..i64::abs(delta) {
            let result = if delta > 0 {
                inventory.increment(item)
            } else {
                inventory.decrement(item)
            };
            if let Err(e) = result {
                report_failure("count change failed", e);
            }
        }
    }
    screen.drain();

    section("Phase 3: Seeding again is a no-op");
    let again = inventory.seed();
    step(&format!(
        "inserted {}, existing {}",
        again.inserted.len(),
        again.existing.len()
    ));

    show_device(&inventory);

    if json {
        section("Replicated documents");
        for doc in inventory.replica().documents(&inventory.config().collection) {
            println!("  {}", doc.to_json());
        }
    }
    inventory.teardown();
}

// ─── Conflict ──────────────────────────────────────────────────────────────

fn run_conflict(count: usize) {
    header("CONFLICT — Concurrent First Launch, Merge-Order Independence");

    let count = count.max(2);
    section(&format!("Phase 1: {} devices seed while offline", count));
    let devices: Vec<Device> = (0..count).map(|i| device(&format!("device-{}", i))).collect();
    for (i, d) in devices.iter().enumerate() {
        let report = d.seed();
        let item = (i % 5) as i64;
        for _ in 0..=i {
            if let Err(e) = d.increment(item) {
                report_failure("increment failed", e);
            }
        }
        step(&format!(
            "{}: seeded {} item(s), item {} += {}",
            d.replica().replica_id(),
            report.inserted.len(),
            item,
            i + 1
        ));
    }

    section("Phase 2: Merge in different orders");
    let forward = device("order-forward");
    for d in &devices {
        forward.replica().pull_from(d.replica());
    }
    let backward = device("order-backward");
    for d in devices.iter().rev() {
        backward.replica().pull_from(d.replica());
    }
    step(&format!(
        "forward: {} document(s), backward: {} document(s)",
        forward.replica().documents("inventories").len(),
        backward.replica().documents("inventories").len()
    ));
    convergence_result(converged(&[&forward, &backward]));

    section("Phase 3: Idempotence, merging the same state twice");
    let before = forward.count(0);
    for d in &devices {
        forward.replica().pull_from(d.replica());
        forward.replica().pull_from(d.replica());
    }
    let after = forward.count(0);
    if before == after {
        step(&format!("Idempotent ✓  item 0 stayed {} after duplicate merges", after));
    } else {
        step(&format!("IDEMPOTENCE FAILURE: {} → {} ✗", before, after));
    }

    show_device(&forward);
}

// ─── Partition ─────────────────────────────────────────────────────────────

fn run_partition() {
    header("PARTITION — Split, Count Independently, Heal & Converge");

    section("Phase 1: Four devices share a baseline");
    let front = device("ipad-front");
    let back = device("ipad-back");
    let pixel = device("pixel");
    let tablet = device("tablet");
    front.seed();
    for other in [&back, &pixel, &tablet] {
        sync_pair(front.replica(), other.replica());
    }
    step("Baseline synced to all four devices");

    section("Phase 2: NETWORK PARTITION");
    println!(
        "  {}   {}",
        "[ ipad-front  ipad-back ]".bright_blue(),
        "[ pixel  tablet ]".bright_red()
    );
    let counts: [(&Device, i64, i64); 4] = [
        (&front, 0, 5),
        (&back, 0, 2),
        (&pixel, 0, -3),
        (&tablet, 3, 4),
    ];
    for (d, item, delta) in counts {
        for _ in 0..delta.abs() {
            let result = if delta > 0 {
                d.increment(item)
            } else {
                d.decrement(item)
            };
            if let Err(e) = result {
                report_failure("count change failed", e);
            }
        }
        step(&format!(
            "{}: item {} {:+}",
            d.replica().replica_id(),
            item,
            delta
        ));
    }
    sync_arrow("ipad-front", "ipad-back", sync_pair(front.replica(), back.replica()));
    sync_arrow("pixel", "tablet", sync_pair(pixel.replica(), tablet.replica()));
    step(&format!(
        "During the split item 0 reads {} on the left and {} on the right",
        front.count(0),
        pixel.count(0)
    ));
    convergence_result(converged(&[&front, &pixel]));

    section("Phase 3: HEAL");
    sync_arrow("ipad-back", "pixel", sync_pair(back.replica(), pixel.replica()));
    sync_arrow("ipad-front", "tablet", sync_pair(front.replica(), tablet.replica()));
    sync_arrow("ipad-front", "pixel", sync_pair(front.replica(), pixel.replica()));
    sync_arrow("ipad-back", "tablet", sync_pair(back.replica(), tablet.replica()));

    convergence_result(converged(&[&front, &back, &pixel, &tablet]));
    step(&format!("item 0 = {} (5 + 2 − 3)", front.count(0)));
    step(&format!("item 3 = {} (tablet: 4)", front.count(3)));
    show_device(&tablet);
}

// ─── Interactive search ───────────────────────────────────────────────────

async fn run_search(name: &str, debounce_ms: u64) {
    header("SEARCH — Debounced Live Search");

    let replica = Arc::new(MemoryReplica::with_id(name));
    let config = InventoryConfig {
        search_debounce: Duration::from_millis(debounce_ms),
        ..Default::default()
    };
    let inventory = Inventory::new(replica, Catalog::store_floor(), config);
    inventory.seed();
    let search = inventory.search(ConsoleListener::new("search"));

    println!();
    println!("  {}", "Commands:".bold().underline());
    println!("    {}                      Type to search (debounced)", "<text>".bright_cyan());
    println!("    {} <text>              Search immediately", ":submit".bright_cyan());
    println!("    {} <id>                   Increment an item", ":inc".bright_cyan());
    println!("    {} <id>                   Decrement an item", ":dec".bright_cyan());
    println!("    {}                       Show the device", ":show".bright_cyan());
    println!("    {}                      Show the search state", ":state".bright_cyan());
    println!("    {}                       Exit", ":quit".bright_cyan());
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        let _ = stdout
            .write_all("tally> ".bright_cyan().bold().to_string().as_bytes())
            .await;
        let _ = stdout.flush().await;

        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => break,
        };
        let (command, arg) = match line.split_once(' ') {
            Some((command, arg)) => (command, arg),
            None => (line.as_str(), ""),
        };

        match command {
            ":submit" | ":s" => search.on_query_submit(arg),
            ":inc" | ":dec" => match arg.trim().parse::<i64>() {
                Ok(id) => {
                    let result = if command == ":inc" {
                        inventory.increment(id)
                    } else {
                        inventory.decrement(id)
                    };
                    match result {
                        Ok(()) => step(&format!("item {} → {}", id, inventory.count(id))),
                        Err(e) => report_failure("count change failed", e),
                    }
                }
                Err(_) => println!("  {} Usage: {} <id>", "!".bright_red(), command),
            },
            ":show" => show_device(&inventory),
            ":state" => match search.state() {
                SearchState::Idle => step("waiting for a query"),
                SearchState::Results(n) => step(&format!("{} result(s)", n)),
                SearchState::Empty => step("no results"),
                SearchState::Failed(message) => report_failure("search failed", message),
            },
            ":quit" | ":q" => {
                println!("  {}", "Goodbye!".dimmed());
                break;
            }
            _ => search.on_query_text_changed(line.as_str()),
        }

        // Give the debounce a chance to print before the next prompt
        if !command.starts_with(':') {
            tokio::time::sleep(Duration::from_millis(debounce_ms + 20)).await;
        } else {
            tokio::task::yield_now().await;
        }
    }

    search.close().await;
    inventory.teardown();
}

// ─── Entry point ───────────────────────────────────────────────────────────

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Demo { device, json } => run_demo(&device, json),
        Commands::Conflict { replicas } => run_conflict(replicas),
        Commands::Partition => run_partition(),
        Commands::Search {
            device,
            debounce_ms,
        } => run_search(&device, debounce_ms).await,
    }
}
