//! Interactive namespace switching demonstration
//!
//! Run with: cargo run --example namespace_demo -- <name|pid|path>
//! Run as root: sudo cargo run --example namespace_demo -- sandbox
//!
//! The namespace must already exist (e.g. `ip netns add sandbox`). Put files
//! in `/etc/netns/sandbox/` to see the `/etc` overlay at work.

use anyhow::{Context, Result};
use netscope_namespace::{
    NamespaceLocator, NamespaceRef, SessionConfig, current_namespace, open_socket_in_namespace,
    with_namespace,
};
use nix::sys::socket::{AddressFamily, SockType};
use tracing_subscriber::EnvFilter;

/// Check if running as root
fn is_root() -> bool {
    unsafe { libc::getuid() == 0 }
}

fn main() -> Result<()> {
    println!("🔀 Netscope Namespace Demo\n");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    demo_registered_namespaces()?;

    let Some(arg) = std::env::args().nth(1) else {
        println!("ℹ️  Pass a namespace name, pid or path to switch into it");
        return Ok(());
    };
    let target: NamespaceRef = arg.parse().context("invalid namespace argument")?;

    if is_root() {
        demo_switch(&target)?;
        demo_socket(&target)?;
        demo_etc_overlay(&target)?;
    } else {
        println!("\n⚠️  Run with sudo to switch namespaces");
    }

    Ok(())
}

fn demo_registered_namespaces() -> Result<()> {
    println!("📋 Registered Namespaces:");
    println!("{:-<60}", "");

    let locator = NamespaceLocator::default();
    let names = locator.list_namespaces()?;
    if names.is_empty() {
        println!("  (none under {})", locator.run_dir().display());
    }
    for name in names {
        println!("  {name}");
    }

    println!("\n  Current: {}", current_namespace()?);
    println!();
    Ok(())
}

fn demo_switch(target: &NamespaceRef) -> Result<()> {
    println!("🚪 Switching Into {target}:");
    println!("{:-<60}", "");

    let before = current_namespace()?;
    let inside = with_namespace(&SessionConfig::new(target.clone()), current_namespace)??;
    let after = current_namespace()?;

    println!("  Before: {before}");
    println!("  Inside: {inside}");
    println!("  After:  {after}");
    println!();
    Ok(())
}

fn demo_socket(target: &NamespaceRef) -> Result<()> {
    println!("🔌 Socket Inside {target}:");
    println!("{:-<60}", "");

    match open_socket_in_namespace(target, AddressFamily::Inet, SockType::Stream) {
        Ok(fd) => println!("  ✅ Opened {fd:?}"),
        Err(e) => println!("  ❌ Failed: {e}"),
    }
    println!();
    Ok(())
}

fn demo_etc_overlay(target: &NamespaceRef) -> Result<()> {
    println!("📂 /etc Overlay for {target}:");
    println!("{:-<60}", "");

    let read_resolv = || std::fs::read_to_string("/etc/resolv.conf").unwrap_or_default();

    println!("  Outside:\n{}", indent(&read_resolv()));

    let config = SessionConfig::new(target.clone()).with_bind_mount_etc(true);
    match with_namespace(&config, read_resolv) {
        Ok(inside) => println!("  Inside:\n{}", indent(&inside)),
        Err(e) => println!("  ❌ Failed: {e}"),
    }

    println!("  After:\n{}", indent(&read_resolv()));
    Ok(())
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| format!("    {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}
