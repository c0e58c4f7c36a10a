use std::path::PathBuf;

use board_tui::RunOptions;

const HELP: &str = "board-tui — read and moderate a message board from the terminal.

  --server <url>       Board to connect to (default http://localhost:1759/)
  --config <path>      Read configuration from <path>
  --version, -V        Show version and exit
  --help,    -h        Show this help message";

fn main() {
    let options = match parse_args(std::env::args().skip(1)) {
        Ok(Some(options)) => options,
        Ok(None) => return,
        Err(message) => {
            eprintln!("error: {message}\n\n{HELP}");
            std::process::exit(2);
        }
    };

    if let Err(err) = board_tui::run(options) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

/// Returns `None` when a flag was handled and the program should exit.
fn parse_args<I: Iterator<Item = String>>(mut args: I) -> Result<Option<RunOptions>, String> {
    let mut options = RunOptions::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("board-tui {}", board_tui::VERSION);
                return Ok(None);
            }
            "--help" | "-h" => {
                println!("{HELP}");
                return Ok(None);
            }
            "--server" => {
                let value = args.next().ok_or("--server needs a url")?;
                options.server = Some(value);
            }
            "--config" => {
                let value = args.next().ok_or("--config needs a path")?;
                options.config_file = Some(PathBuf::from(value));
            }
            other => return Err(format!("unknown argument {other}")),
        }
    }
    Ok(Some(options))
}
