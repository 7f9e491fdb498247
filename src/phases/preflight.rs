use anyhow::{Context, Result, bail};
use remotekit::{RemoteCommand, SessionStatus};

use crate::config::ConfigInvalid;
use crate::engine::{Orchestrator, Phase};
use crate::{paths, ui};

/// Check local inputs and open a session to every host.
pub struct Preflight;

impl Phase for Preflight {
    fn name(&self) -> &'static str {
        "preflight"
    }

    fn description(&self) -> &'static str {
        "check packages, connectivity and host compatibility"
    }

    fn steps(&self) -> usize {
        4
    }

    fn run(&self, ctx: &mut Orchestrator) -> Result<()> {
        ctx.step("Checking local package files");
        check_local_packages(ctx)?;

        let targets = ctx.targets()?;
        ctx.step(&format!("Opening sessions to {} host(s)", targets.len()));
        let mut degraded = 0;
        for target in &targets {
            if ctx.pool.connect(target) == SessionStatus::Degraded {
                degraded += 1;
                ui::warn(&format!("{target}: no shared session, using one-off connections"));
            }
        }
        if degraded > 0 {
            ui::dim(&format!(
                "{degraded} of {} host(s) degraded; the run continues",
                targets.len()
            ));
        }

        ctx.step("Confirming reachability");
        for target in &targets {
            ctx.pool
                .run(target, &RemoteCommand::inspect("true"))
                .with_context(|| format!("{target} is unreachable"))?;
        }

        let checks = &ctx.config.preflight.checks;
        ctx.step(&format!("Running {} compatibility check(s)", checks.len()));
        let mut failed: Vec<String> = Vec::new();
        for check in checks {
            let Some((program, args)) = check.command.split_first() else {
                continue;
            };
            let command = RemoteCommand::inspect(program.as_str()).args(args.iter().map(String::as_str));
            for target in &targets {
                match ctx.pool.run(target, &command) {
                    Ok(_) => log::debug!("{target}: check '{}' passed", check.name),
                    Err(remotekit::Error::CommandFailed {
                        exit_code, stderr, ..
                    }) => {
                        let detail = if stderr.is_empty() {
                            format!("exit status {exit_code}")
                        } else {
                            stderr
                        };
                        failed.push(format!("{target}: {} ({detail})", check.name));
                    }
                    Err(e) => {
                        return Err(e).with_context(|| {
                            format!("running check '{}' on {target}", check.name)
                        });
                    }
                }
            }
        }
        if !failed.is_empty() {
            for line in &failed {
                ui::error(line);
            }
            bail!("{} compatibility check(s) failed", failed.len());
        }

        Ok(())
    }
}

fn check_local_packages(ctx: &Orchestrator) -> Result<()> {
    let mut missing = Vec::new();
    let server = ctx.config.server_package();
    if !server.is_file() {
        missing.push(server.display().to_string());
    }
    for ext in &ctx.config.packages.extensions {
        let path = paths::expand(&ext.path);
        if !path.is_file() {
            missing.push(path.display().to_string());
        }
    }
    if missing.is_empty() {
        return Ok(());
    }
    Err(ConfigInvalid(format!("package file(s) not found: {}", missing.join(", "))).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PreflightCheck;
    use crate::incident;
    use crate::phases::init::Init;
    use crate::testing::{self, Scripted};
    use remotekit::RawOutput;
    use tempfile::TempDir;

    fn prepared(dir: &TempDir, transport: std::sync::Arc<Scripted>) -> Orchestrator {
        let mut ctx = testing::orchestrator(dir.path(), transport, false);
        Init.rehydrate(&mut ctx).unwrap();
        ctx
    }

    #[test]
    fn test_missing_package_is_a_configuration_error() {
        let dir = TempDir::new().unwrap();
        let transport = Scripted::ok();
        let mut ctx = prepared(&dir, transport.clone());
        ctx.config.packages.server = "/nonexistent/server.rpm".to_string();

        let err = Preflight.run(&mut ctx).unwrap_err();

        assert_eq!(
            incident::Category::from_error(&err),
            incident::Category::Configuration
        );
        assert!(transport.calls().is_empty());
    }

    #[test]
    fn test_degraded_host_does_not_fail_preflight() {
        let dir = TempDir::new().unwrap();
        let transport = Scripted::new(|inv| {
            let master = inv.args.iter().any(|a| a == "ControlMaster=yes");
            if master && inv.host == "sdw3" {
                Ok(RawOutput {
                    exit_code: Some(255),
                    stdout: String::new(),
                    stderr: "mux_client_request_session: session request failed".to_string(),
                })
            } else {
                Ok(RawOutput::exited(0))
            }
        });
        let mut ctx = prepared(&dir, transport.clone());

        Preflight.run(&mut ctx).unwrap();

        assert_eq!(ctx.pool.degraded_hosts(), vec!["sdw3"]);
        let one_off = transport
            .calls()
            .into_iter()
            .filter(|inv| inv.args.iter().any(|a| a == "ControlPath=none"))
            .count();
        assert_eq!(one_off, 1);
    }

    #[test]
    fn test_failed_checks_are_reported_together() {
        let dir = TempDir::new().unwrap();
        let transport = Scripted::new(|inv| {
            let cmd = inv.remote_command().unwrap_or_default();
            if cmd.starts_with("grep") && (inv.host == "sdw1" || inv.host == "sdw2") {
                Ok(RawOutput::exited(1))
            } else {
                Ok(RawOutput::exited(0))
            }
        });
        let mut ctx = prepared(&dir, transport);
        ctx.config.preflight.checks.push(PreflightCheck {
            name: "supported OS".to_string(),
            command: vec!["grep".to_string(), "-q".to_string(), "el8".to_string(), "/etc/os-release".to_string()],
        });

        let err = Preflight.run(&mut ctx).unwrap_err();
        assert_eq!(err.to_string(), "2 compatibility check(s) failed");
    }

    #[test]
    fn test_unreachable_host_is_fatal() {
        let dir = TempDir::new().unwrap();
        let transport = Scripted::new(|inv| {
            if inv.host == "sdw2" {
                Ok(RawOutput {
                    exit_code: Some(255),
                    stdout: String::new(),
                    stderr: "ssh: connect to host sdw2 port 22: No route to host".to_string(),
                })
            } else {
                Ok(RawOutput::exited(0))
            }
        });
        let mut ctx = prepared(&dir, transport);

        let err = Preflight.run(&mut ctx).unwrap_err();

        assert!(err.to_string().contains("sdw2 is unreachable"));
        assert_eq!(
            incident::Category::from_error(&err),
            incident::Category::Connectivity
        );
    }
}
