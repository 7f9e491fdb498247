//! Typed remote command descriptors.
//!
//! A [`RemoteCommand`] keeps program, arguments, target user and stdin as
//! separate fields. It is rendered exactly once, with every word quoted by
//! `shell-words`, into the string the remote shell receives. Secrets travel
//! on stdin and never appear in the rendered text.

use crate::types::Secret;
use std::fmt;

/// A command to run on a remote host.
#[derive(Debug, Clone)]
pub struct RemoteCommand {
    program: String,
    args: Vec<String>,
    run_as: Option<String>,
    env_file: Option<String>,
    stdin: Option<Secret>,
    mutating: bool,
    accepted_exit_codes: Vec<i32>,
}

impl RemoteCommand {
    /// A command that changes host state. Intercepted in dry-run mode.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            run_as: None,
            env_file: None,
            stdin: None,
            mutating: true,
            accepted_exit_codes: vec![0],
        }
    }

    /// A read-only inspection command. Runs even in dry-run mode.
    pub fn inspect(program: impl Into<String>) -> Self {
        Self {
            mutating: false,
            ..Self::new(program)
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run through a login shell of `user`.
    pub fn run_as(mut self, user: impl Into<String>) -> Self {
        self.run_as = Some(user.into());
        self
    }

    /// Source a shell environment file before running the program.
    pub fn source_env(mut self, path: impl Into<String>) -> Self {
        self.env_file = Some(path.into());
        self
    }

    /// Feed a secret to the command's stdin.
    pub fn stdin_secret(mut self, secret: Secret) -> Self {
        self.stdin = Some(secret);
        self
    }

    /// Exit statuses that count as success (default: only 0).
    pub fn accept_exit_codes(mut self, codes: &[i32]) -> Self {
        self.accepted_exit_codes = codes.to_vec();
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn is_mutating(&self) -> bool {
        self.mutating
    }

    pub fn stdin(&self) -> Option<&Secret> {
        self.stdin.as_ref()
    }

    pub fn accepts(&self, exit_code: i32) -> bool {
        self.accepted_exit_codes.contains(&exit_code)
    }

    /// Render the single string handed to the remote shell.
    ///
    /// With `elevate`, the command is prefixed with `sudo -n`.
    pub fn render(&self, elevate: bool) -> String {
        let mut core: Vec<String> = Vec::with_capacity(self.args.len() + 1);
        core.push(self.program.clone());
        core.extend(self.args.iter().cloned());

        if let Some(env_file) = &self.env_file {
            let script = format!(
                ". {} && exec {}",
                shell_words::quote(env_file),
                shell_words::join(&core)
            );
            core = vec!["bash".to_string(), "-c".to_string(), script];
        }

        let mut argv: Vec<String> = Vec::new();
        if elevate {
            argv.extend(["sudo".to_string(), "-n".to_string()]);
        }
        match &self.run_as {
            Some(user) => {
                argv.extend([
                    "runuser".to_string(),
                    "-l".to_string(),
                    user.clone(),
                    "-c".to_string(),
                    shell_words::join(&core),
                ]);
            }
            None => argv.extend(core),
        }

        shell_words::join(argv)
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_plain() {
        let cmd = RemoteCommand::new("mkdir").args(["-p", "/data/primary/seg0"]);
        assert_eq!(cmd.render(false), "mkdir -p /data/primary/seg0");
        assert!(cmd.is_mutating());
    }

    #[test]
    fn test_render_quotes_hostile_arguments() {
        let cmd = RemoteCommand::new("rm").args(["-rf", "/data/x; reboot"]);
        assert_eq!(cmd.render(false), "rm -rf '/data/x; reboot'");
    }

    #[test]
    fn test_render_elevated_as_user_with_env() {
        let cmd = RemoteCommand::new("gpinitsystem")
            .args(["-a", "-c", "/tmp/cluster_init.conf"])
            .source_env("/usr/local/db/cluster_path.sh")
            .run_as("gpadmin");

        let rendered = cmd.render(true);
        assert!(rendered.starts_with("sudo -n runuser -l gpadmin -c "));
        assert!(rendered.contains("cluster_path.sh"));
        assert!(rendered.contains("gpinitsystem -a -c /tmp/cluster_init.conf"));
    }

    #[test]
    fn test_stdin_secret_not_rendered() {
        let cmd = RemoteCommand::new("chpasswd").stdin_secret(Secret::new("gpadmin:s3cret"));
        assert_eq!(cmd.render(false), "chpasswd");
        assert!(!cmd.to_string().contains("s3cret"));
        assert!(!format!("{cmd:?}").contains("s3cret"));
    }

    #[test]
    fn test_inspect_is_read_only() {
        let cmd = RemoteCommand::inspect("id").args(["-u", "gpadmin"]);
        assert!(!cmd.is_mutating());
        assert!(cmd.accepts(0));
        assert!(!cmd.accepts(1));
    }

    #[test]
    fn test_accept_exit_codes() {
        let cmd = RemoteCommand::new("pkill").accept_exit_codes(&[0, 1]);
        assert!(cmd.accepts(1));
        assert!(!cmd.accepts(2));
    }
}
