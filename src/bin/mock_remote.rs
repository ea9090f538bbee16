//! Stand-in remote shell for integration testing
//!
//! Invoked as `mock_remote <host> <command...>`, it runs the command on the
//! local machine. When `MOCK_REMOTE_LOG` is set, each invocation appends
//! `<host> <command...>` to that file first.

use std::io::Write;
use std::process::Command;

fn main() {
    let mut args = std::env::args().skip(1);
    let Some(host) = args.next() else {
        eprintln!("usage: mock_remote <host> <command...>");
        std::process::exit(255);
    };
    let command: Vec<String> = args.collect();
    let Some((program, rest)) = command.split_first() else {
        eprintln!("mock_remote: no command for {host}");
        std::process::exit(255);
    };

    if let Ok(log) = std::env::var("MOCK_REMOTE_LOG") {
        if let Ok(mut file) = std::fs::OpenOptions::new().create(true).append(true).open(log) {
            let _ = writeln!(file, "{} {}", host, command.join(" "));
        }
    }

    let mut cmd = Command::new(program);
    cmd.args(rest);

    // Replace this process so signals reach the command itself
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        let err = cmd.exec();
        eprintln!("mock_remote: {program}: {err}");
        std::process::exit(255);
    }

    #[cfg(not(unix))]
    {
        match cmd.status() {
            Ok(status) => std::process::exit(status.code().unwrap_or(255)),
            Err(err) => {
                eprintln!("mock_remote: {program}: {err}");
                std::process::exit(255);
            }
        }
    }
}
