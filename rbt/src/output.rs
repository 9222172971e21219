//! Colored console output helpers.

use colored::Colorize;

use rbt_common::DEFAULT_PORT;

pub fn success(text: &str) {
    println!("{}", text.green());
}

pub fn failure(text: &str) {
    eprintln!("{}", text.red());
}

fn hostname() -> String {
    whoami::hostname().unwrap_or_else(|_| "this-machine".to_string())
}

/// Walk a developer through linking a freshly registered project from
/// their local machine.
pub fn print_install_steps(project_name: &str, app_key: &str) {
    let host = hostname();

    println!("{}", "1. Start the server".bright_green().bold());
    println!("Ensure the daemon is running on this machine:");
    println!();
    println!("{}", "rbt server start".bold());
    println!();
    println!("{}", "2. Add the remote".bright_green().bold());
    println!("On your local machine, register this machine as a remote");
    println!("(replace the host with this machine's reachable address):");
    println!();
    println!(
        "{}",
        format!("rbt remotes add {host} {host} {DEFAULT_PORT} {app_key}").bold()
    );
    println!();
    println!("{}", "3. Link the project".bright_green().bold());
    println!("Move into your code's folder and type:");
    println!();
    println!(
        "{}",
        format!("rbt projects create-config {host} {project_name}").bold()
    );
    println!();
    println!("{}", "4. Build!".bright_green().bold());
    println!(
        "Open {} and put the commands you want the server to run under",
        "rbt.toml".bold()
    );
    println!("{}. When you are done, simply type:", "commands".bold());
    println!();
    println!("{}", "rbt".bold());
    println!();
    println!("{}", "Hooray, you are done!".green());
}
