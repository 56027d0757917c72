//! Interactive command line for the management control plane.
//!
//! Slash-prefixed lines are local control commands (`/help`, `/quit`,
//! `/connect`, `/prefix`, `/to`); the command word is lower-cased
//! before lookup, so they are case-insensitive. Everything else is an
//! operation request in the
//! `type=name[,type=name]* : op-name ( [p=v[,p=v]*] )` format,
//! resolved against the current address prefix and executed over the
//! management protocol. Empty lines are silently skipped.

mod parser;
mod prefix;

use std::io::{BufRead, Write};
use std::net::{SocketAddr, ToSocketAddrs};
use std::process::ExitCode;

use clap::Parser;

use castellan_controller::keys;
use castellan_protocol::RemoteControllerClient;
use castellan_value::Value;

use crate::prefix::Prefix;

const DEFAULT_PORT: u16 = 9990;

/// Castellan management CLI.
#[derive(Parser, Debug)]
#[command(name = "castellan-cli")]
#[command(about = "Interactive client for the castellan management protocol")]
struct Args {
    /// Connect on startup to host[:port]
    #[arg(short, long)]
    connect: Option<String>,
}

struct CommandContext {
    client: Option<RemoteControllerClient>,
    prefix: Prefix,
    runtime: tokio::runtime::Runtime,
    terminate: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("failed to start the i/o runtime: {e}");
            return ExitCode::FAILURE;
        }
    };
    let mut ctx = CommandContext {
        client: None,
        prefix: Prefix::default(),
        runtime,
        terminate: false,
    };

    if let Some(target) = &args.connect {
        connect(&mut ctx, target);
    } else {
        println!(
            "You are disconnected at the moment. Type /connect to connect to the server \
             or /help for the list of supported commands."
        );
    }

    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    while !ctx.terminate {
        print!("[{}] ", ctx.prefix.format());
        if std::io::stdout().flush().is_err() {
            return ExitCode::FAILURE;
        }
        let line = match lines.next() {
            Some(Ok(line)) => line,
            Some(Err(e)) => {
                eprintln!("failed to read the command line: {e}");
                return ExitCode::FAILURE;
            }
            None => break,
        };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix('/') {
            // lower-cased before lookup; command names are
            // case-insensitive
            let lowered = rest.to_lowercase();
            let (cmd, cmd_args) = match lowered.split_once(char::is_whitespace) {
                Some((cmd, rest)) => (cmd, rest.trim()),
                None => (lowered.as_str(), ""),
            };
            match cmd {
                "help" | "h" => help(),
                "quit" | "q" => ctx.terminate = true,
                "connect" => connect(&mut ctx, cmd_args),
                "prefix" | "to" => set_prefix(&mut ctx, cmd_args),
                _ => println!(
                    "Unexpected command '{line}'. Type /help for the list of supported commands."
                ),
            }
            continue;
        }

        handle_operation_request(&mut ctx, &line);
    }
    ExitCode::SUCCESS
}

fn help() {
    println!("Supported commands:");
    println!("  /help (/h)           print this message");
    println!("  /quit (/q)           end the session");
    println!("  /connect [host[:port]]  connect to a management endpoint (default port {DEFAULT_PORT})");
    println!("  /prefix (/to) [spec] print or set the address prefix, e.g. subsystem=web");
    println!();
    println!("Anything else is an operation request:");
    println!("  {}", parser::FORMAT);
}

fn connect(ctx: &mut CommandContext, target: &str) {
    let target = if target.is_empty() { "localhost" } else { target };
    let with_port = if target.contains(':') {
        target.to_string()
    } else {
        format!("{target}:{DEFAULT_PORT}")
    };
    let resolved: Option<SocketAddr> = with_port
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next());
    match resolved {
        Some(addr) => {
            ctx.client = Some(RemoteControllerClient::new(addr));
            println!("Connected to {addr}.");
        }
        None => println!("Failed to resolve '{with_port}'."),
    }
}

fn set_prefix(ctx: &mut CommandContext, spec: &str) {
    if spec.is_empty() {
        if ctx.prefix.is_empty() {
            println!("The prefix is empty.");
        } else {
            println!("{}", ctx.prefix.format());
        }
        return;
    }
    if spec == "/" {
        ctx.prefix.reset();
        return;
    }
    match Prefix::parse(spec) {
        Ok(prefix) => ctx.prefix = prefix,
        Err(e) => println!("{e}"),
    }
}

fn handle_operation_request(ctx: &mut CommandContext, line: &str) {
    let Some(client) = ctx.client.clone() else {
        println!("You are disconnected. Type /connect to connect to the server.");
        return;
    };
    let request = match parser::parse(line) {
        Ok(request) => request,
        Err(e) => {
            println!("{e}");
            return;
        }
    };
    let address = match ctx.prefix.resolve(&request.address) {
        Ok(address) => address,
        Err(e) => {
            println!("{e}");
            return;
        }
    };

    let mut operation = Value::empty_object();
    let filled = (|| {
        operation.insert(keys::OP, request.operation.as_str())?;
        operation.insert(keys::OP_ADDR, address)?;
        for (name, value) in &request.arguments {
            operation.insert(name.clone(), value.as_str())?;
        }
        Ok::<(), castellan_value::ValueError>(())
    })();
    if let Err(e) = filled {
        println!("Failed to build the operation: {e}");
        return;
    }

    match ctx.runtime.block_on(client.execute(&operation)) {
        Ok(envelope) => println!("{}", envelope.to_json_string(true)),
        Err(e) => println!("The operation failed: {e}"),
    }
}
