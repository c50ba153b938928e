use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `levels` takes the `EnvFilter` syntax, e.g.
/// `info` or `triton_sd=debug,framework=info`; an invalid one falls back to `info`.
///
/// Logs go to stderr, stdout is left for the output of discovered targets.
pub fn init(color: bool, json: bool, levels: &str) {
    let filter = EnvFilter::try_new(levels).unwrap_or_else(|err| {
        eprintln!("invalid log level {levels:?}, {err}, fallback to \"info\"");
        EnvFilter::new("info")
    });

    let builder = tracing_subscriber::fmt()
        .with_ansi(color)
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    // it might be installed already, e.g. by another test
    let _ = if json {
        builder.json().flatten_event(true).try_init()
    } else {
        builder.try_init()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice() {
        init(false, false, "debug");
        init(false, true, "not a valid=level=filter");

        debug!(message = "still works");
    }
}
