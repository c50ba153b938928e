use std::fmt;
use std::io::IsTerminal;
use std::path::PathBuf;

use argh::FromArgs;
use exitcode::ExitCode;
use triton_sd::config;
use triton_sd::discovery::triton::Discovery;

#[derive(FromArgs, PartialEq, Debug)]
#[argh(
    subcommand,
    name = "validate",
    description = "Validate the config file, then exit",
    help_triggers("-h", "--help")
)]
pub struct Validate {
    #[argh(
        switch,
        description = "disable environment checks, TLS certificates and keys are not loaded"
    )]
    no_environment: bool,

    #[argh(option, short = 'c', long = "config", description = "the config file")]
    config: PathBuf,
}

impl Validate {
    pub fn run(&self) -> ExitCode {
        let mut fmt = Formatter::new(std::io::stdout().is_terminal());

        let config = match config::load_from_path(&self.config) {
            Ok(config) => {
                fmt.success(format!("Loaded {:?}", self.config));
                config
            }
            Err(errs) => {
                fmt.title(format!("Failed to load {:?}", self.config));
                fmt.sub_error(errs);
                return exitcode::CONFIG;
            }
        };

        if !self.no_environment {
            let errs = config
                .triton_sd_configs
                .iter()
                .enumerate()
                .filter_map(|(index, config)| {
                    Discovery::new(config)
                        .err()
                        .map(|err| format!("triton_sd_configs[{index}]: {err}"))
                })
                .collect::<Vec<_>>();

            if !errs.is_empty() {
                fmt.title("Discoverer errors");
                fmt.sub_error(errs);
                return exitcode::CONFIG;
            }

            fmt.success(format!(
                "Discoverers ({})",
                config.triton_sd_configs.len()
            ));
        }

        fmt.validated();

        exitcode::OK
    }
}

struct Formatter {
    /// Width of largest printed line
    max_line_width: usize,
    /// Can empty line be printed
    print_space: bool,
    color: bool,
}

impl Formatter {
    fn new(color: bool) -> Self {
        Self {
            max_line_width: 0,
            print_space: false,
            color,
        }
    }

    fn error_intro(&self) -> &'static str {
        if self.color {
            // red
            "\x1b[31mx\x1b[0m"
        } else {
            "x"
        }
    }

    fn success_intro(&self) -> &'static str {
        if self.color {
            // green
            "\x1b[32m√\x1b[0m"
        } else {
            "√"
        }
    }

    /// Final confirmation that validation process was successful.
    #[allow(clippy::print_stdout)]
    fn validated(&self) {
        println!("{:-^width$}", "", width = self.max_line_width);

        // the escape codes must not be counted into the width
        if self.color {
            println!(
                "{:>width$}",
                "\x1b[32mValidated\x1b[0m",
                width = self.max_line_width + 9
            );
        } else {
            println!("{:>width$}", "Validated", width = self.max_line_width)
        }
    }

    fn success(&mut self, msg: impl AsRef<str>) {
        self.print(format!("{} {}\n", self.success_intro(), msg.as_ref()))
    }

    fn title(&mut self, title: impl AsRef<str>) {
        self.space();
        self.print(format!(
            "{}\n{:-<width$}\n",
            title.as_ref(),
            "",
            width = title.as_ref().len()
        ))
    }

    /// A list of errors that go with a title.
    fn sub_error<I: IntoIterator>(&mut self, errors: I)
    where
        I::Item: fmt::Display,
    {
        let intro = self.error_intro();
        for err in errors {
            self.print(format!("{intro} {err}\n"));
        }

        self.space();
    }

    fn space(&mut self) {
        if self.print_space {
            self.print_space = false;
            #[allow(clippy::print_stdout)]
            {
                println!();
            }
        }
    }

    fn print(&mut self, text: impl AsRef<str>) {
        let width = text
            .as_ref()
            .lines()
            .map(|line| line.chars().count())
            .max()
            .unwrap_or(0);
        self.max_line_width = width.max(self.max_line_width);
        self.print_space = true;

        #[allow(clippy::print_stdout)]
        {
            print!("{}", text.as_ref())
        }
    }
}
