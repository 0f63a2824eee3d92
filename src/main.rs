use std::collections::BTreeMap;
use std::io::IsTerminal;

use clap::Parser;

use qvm::app::Qubes;
use qvm::cli::{
    Cli, Command, GlobalPrefsArgs, OutputFormat, PoolCommand, PrefsArgs, VolumeCommand,
};
use qvm::config;
use qvm::create::{self, CreateRequest};
use qvm::logging::{self, Verbosity};
use qvm::property::{self, PropertyValue};
use qvm::run::{self, RunRequest};
use qvm::transport::AnyTransport;
use qvm::util;
use qvm::vm::PowerOp;

type App = Qubes<AnyTransport>;

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    logging::init(Verbosity::from_flags(cli.verbose, cli.quiet));

    // --help-classes never talks to qubesd, so answer it before loading config
    if let Command::Create(args) = &cli.command
        && args.help_classes
    {
        for (class, description) in create::VM_CLASSES {
            println!("{class:<14} {description}");
        }
        return Ok(());
    }

    let config = config::load_config(cli.config.as_deref())?;
    let mut app = Qubes::connect(&config, cli.socket.as_deref(), cli.transport)?;

    match cli.command {
        Command::Create(args) => {
            let req = CreateRequest::from_args(&args, &config.create)?;
            let vm = create::create(&mut app, &req).await?;
            tracing::info!(vm = %vm.name, class = %vm.class, "created VM");
        }
        Command::Run(args) => {
            let req = RunRequest::from_args(&args, &config.run, std::io::stdout().is_terminal())?;
            let exit_code = run::run(&mut app, &req).await?;
            std::process::exit(exit_code);
        }
        Command::Ls { format } => list_vms(&mut app, &format).await?,
        Command::Prefs(args) => vm_prefs(&mut app, &args).await?,
        Command::GlobalPrefs(args) => global_prefs(&app, &args).await?,
        Command::Start { vms } => power(&mut app, &vms, PowerOp::Start).await?,
        Command::Shutdown { vms } => power(&mut app, &vms, PowerOp::Shutdown).await?,
        Command::Kill { vms } => power(&mut app, &vms, PowerOp::Kill).await?,
        Command::Pause { vms } => power(&mut app, &vms, PowerOp::Pause).await?,
        Command::Unpause { vms } => power(&mut app, &vms, PowerOp::Unpause).await?,
        Command::Remove { vm } => {
            let vm = app.domains.get(&app.transport, &vm).await?;
            vm.remove(&app.transport).await?;
        }
        Command::Pool { action } => pool_command(&mut app, action).await?,
        Command::Volume { action } => volume_command(&mut app, action).await?,
        Command::Labels => {
            for label in app.labels.names(&app.transport).await? {
                println!("{label}");
            }
        }
    }

    Ok(())
}

async fn list_vms(app: &mut App, format: &OutputFormat) -> miette::Result<()> {
    let mut rows = Vec::new();
    for name in app.domains.names(&app.transport).await? {
        let entry = app
            .domains
            .entry(&app.transport, &name)
            .await?
            .unwrap_or_default();
        rows.push(VmJson {
            class: entry.get("class").cloned().unwrap_or_default(),
            state: entry.get("state").cloned().unwrap_or_else(|| "-".into()),
            name,
        });
    }

    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                facet_json::to_string(&LsJson { vms: rows }).expect("JSON serialization"),
            );
        }
        OutputFormat::Plain => {
            let width = rows.iter().map(|r| r.name.len()).max().unwrap_or(4).max(4);
            println!("{:<width$}  {:<14} STATE", "NAME", "CLASS");
            for row in &rows {
                let state = match row.state.as_str() {
                    "Running" | "Transient" => console::style(&row.state).green(),
                    "Paused" | "Suspended" => console::style(&row.state).yellow(),
                    "Crashed" => console::style(&row.state).red(),
                    _ => console::style(&row.state).dim(),
                };
                println!("{:<width$}  {:<14} {state}", row.name, row.class);
            }
        }
    }
    Ok(())
}

fn print_property(name: &str, value: &PropertyValue, width: usize) {
    let marker = if value.is_default { "D" } else { "-" };
    println!("{name:<width$} {marker} {value}");
}

async fn vm_prefs(app: &mut App, args: &PrefsArgs) -> miette::Result<()> {
    let vm = app.domains.get(&app.transport, &args.vm).await?;
    let t = &app.transport;

    let Some(property) = &args.property else {
        let names = vm.property_list(t).await?;
        let width = names.iter().map(String::len).max().unwrap_or(0);
        for name in &names {
            print_property(name, &vm.property_get(t, name).await?, width);
        }
        return Ok(());
    };

    if args.help_property {
        println!("{}", vm.property_help(t, property).await?);
    } else if args.default {
        vm.property_reset(t, property).await?;
    } else if let Some(value) = &args.value {
        vm.property_set(t, property, value).await?;
    } else {
        println!("{}", vm.property_get(t, property).await?);
    }
    Ok(())
}

async fn global_prefs(app: &App, args: &GlobalPrefsArgs) -> miette::Result<()> {
    let Some(property) = &args.property else {
        let names = app.property_list().await?;
        let width = names.iter().map(String::len).max().unwrap_or(0);
        for name in &names {
            print_property(name, &app.property_get(name).await?, width);
        }
        return Ok(());
    };

    if args.help_property {
        println!("{}", app.property_help(property).await?);
    } else if args.default {
        app.property_reset(property).await?;
    } else if let Some(value) = &args.value {
        app.property_set(property, value).await?;
    } else {
        println!("{}", app.property_get(property).await?);
    }
    Ok(())
}

async fn power(app: &mut App, names: &[String], op: PowerOp) -> miette::Result<()> {
    // resolve every name first so a typo doesn't leave the batch half done
    let mut vms = Vec::with_capacity(names.len());
    for name in names {
        vms.push(app.domains.get(&app.transport, name).await?);
    }
    for vm in &vms {
        vm.power(&app.transport, op).await?;
    }
    Ok(())
}

async fn pool_command(app: &mut App, action: PoolCommand) -> miette::Result<()> {
    match action {
        PoolCommand::List => {
            for pool in app.pools.names(&app.transport).await? {
                println!("{pool}");
            }
        }
        PoolCommand::Drivers => {
            for driver in app.pool_drivers().await? {
                let params = app.pool_driver_parameters(&driver).await?;
                println!("{driver:<16} {}", params.join(" "));
            }
        }
        PoolCommand::Add {
            name,
            driver,
            params,
        } => {
            let params = params
                .iter()
                .map(|p| property::parse_assignment(p))
                .collect::<Result<BTreeMap<_, _>, _>>()?;
            app.add_pool(&name, &driver, &params).await?;
        }
        PoolCommand::Remove { name } => app.remove_pool(&name).await?,
    }
    Ok(())
}

async fn volume_command(app: &mut App, action: VolumeCommand) -> miette::Result<()> {
    match action {
        VolumeCommand::List { vm } => {
            let vm = app.domains.get(&app.transport, &vm).await?;
            for volume in vm.volume_list(&app.transport).await? {
                println!("{volume}");
            }
        }
        VolumeCommand::Info { vm, volume } => {
            let vm = app.domains.get(&app.transport, &vm).await?;
            let info = vm.volume_info(&app.transport, &volume).await?;
            println!("pool              {}", info.pool);
            println!("vid               {}", info.vid);
            println!("size              {}", util::format_size(info.size));
            println!("usage             {}", util::format_size(info.usage));
            println!("rw                {}", info.rw);
            println!("revisions_to_keep {}", info.revisions_to_keep);
            for (key, value) in &info.extra {
                println!("{key:<17} {value}");
            }
        }
        VolumeCommand::Resize { vm, volume, size } => {
            let size = util::parse_size(&size)?;
            let vm = app.domains.get(&app.transport, &vm).await?;
            vm.volume_resize(&app.transport, &volume, size).await?;
        }
    }
    Ok(())
}

// ── JSON output structs ─────────────────────────────────────────────

#[derive(facet::Facet)]
struct VmJson {
    name: String,
    class: String,
    state: String,
}

#[derive(facet::Facet)]
struct LsJson {
    vms: Vec<VmJson>,
}
