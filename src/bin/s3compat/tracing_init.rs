use std::env;
use std::io::IsTerminal;

use tracing_subscriber::fmt::format::FmtSpan;

use s3compat_rs::config::TracingConfig;

const EVENT_FILTER_ENV_VAR: &str = "RUST_LOG";

pub fn init_tracing(config: &TracingConfig) {
    let fmt_span = if config.span_events_tracing {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let subscriber_builder = tracing_subscriber::fmt()
        .with_writer(std::io::stdout)
        .compact()
        .with_ansi(!config.disable_color_tracing && std::io::stdout().is_terminal())
        .with_span_events(fmt_span);

    let tracing_level = config.tracing_level;
    let (event_filter, show_target) = if config.aws_sdk_tracing {
        (
            format!(
                "s3compat_rs={tracing_level},s3compat={tracing_level},aws_smithy_runtime={tracing_level},aws_config={tracing_level},aws_sigv4={tracing_level},reqwest={tracing_level}"
            ),
            true,
        )
    } else if let Ok(filter) = env::var(EVENT_FILTER_ENV_VAR) {
        (filter, true)
    } else {
        (
            format!("s3compat_rs={tracing_level},s3compat={tracing_level}"),
            false,
        )
    };

    let subscriber_builder = subscriber_builder
        .with_env_filter(event_filter)
        .with_target(show_target);
    if config.json_tracing {
        subscriber_builder.json().init();
    } else {
        subscriber_builder.init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusty_fork::rusty_fork_test;

    fn tracing_config(json: bool, aws_sdk: bool, span_events: bool, no_color: bool) -> TracingConfig {
        TracingConfig {
            tracing_level: log::Level::Info,
            json_tracing: json,
            aws_sdk_tracing: aws_sdk,
            span_events_tracing: span_events,
            disable_color_tracing: no_color,
        }
    }

    rusty_fork_test! {
        #[test]
        fn init_json_tracing() {
            init_tracing(&tracing_config(true, false, false, false));
        }

        #[test]
        fn init_aws_sdk_tracing() {
            init_tracing(&tracing_config(false, true, false, false));
        }

        #[test]
        fn init_normal_tracing() {
            // Runs in a forked process.
            unsafe { env::remove_var(EVENT_FILTER_ENV_VAR) };

            init_tracing(&tracing_config(false, false, false, false));
        }

        #[test]
        fn init_span_events_tracing() {
            init_tracing(&tracing_config(false, false, true, true));
        }

        #[test]
        fn init_with_env() {
            // Runs in a forked process.
            unsafe { env::set_var(EVENT_FILTER_ENV_VAR, "s3compat_rs=trace") };

            init_tracing(&tracing_config(false, false, false, true));
        }
    }
}
