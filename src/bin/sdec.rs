//! `sdec <file> [options]` is shorthand for `stereo-decode play <file> [options]`.
//! Anything starting with a subcommand name or a flag is passed through.

use std::env;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Command, exit};

const SUBCOMMANDS: &[&str] = &[
    "probe",
    "extract",
    "play",
    "params",
    "versions",
    "completions",
    "help",
];

/// The main binary is installed next to this one.
fn main_binary() -> PathBuf {
    let name = format!("stereo-decode{}", env::consts::EXE_SUFFIX);
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(&name)))
        .filter(|path| path.is_file())
        .unwrap_or_else(|| PathBuf::from(name))
}

fn forwarded_args(mut args: Vec<OsString>) -> Vec<OsString> {
    let passthrough = args.first().is_none_or(|first| {
        let first = first.to_string_lossy();
        first.starts_with('-') || SUBCOMMANDS.contains(&first.as_ref())
    });
    if !passthrough {
        args.insert(0, OsString::from("play"));
    }
    args
}

fn main() {
    let args = forwarded_args(env::args_os().skip(1).collect());
    match Command::new(main_binary()).args(&args).status() {
        Ok(status) => exit(status.code().unwrap_or(1)),
        Err(err) => {
            eprintln!("sdec: cannot run stereo-decode: {err}");
            exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forward(args: &[&str]) -> Vec<String> {
        forwarded_args(args.iter().map(OsString::from).collect())
            .into_iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn bare_files_are_played() {
        assert_eq!(forward(&["clip.y4m", "--max-frames", "3"]), [
            "play",
            "clip.y4m",
            "--max-frames",
            "3"
        ]);
        assert_eq!(forward(&["probe", "a.y4m"]), ["probe", "a.y4m"]);
        assert_eq!(forward(&["--version"]), ["--version"]);
        assert!(forward(&[]).is_empty());
    }
}
