//! Host preparation: clear leftovers of earlier installs, then make sure the
//! service account and its directories exist with the right ownership.
//!
//! Every operation is a small remote command run under the pool's retry
//! policy, and every error names the concern it was addressing.

use anyhow::{Context, Result, bail};
use clusterkit::HostAssignment;
use remotekit::{RemoteCommand, Secret, SessionPool, Target};

use crate::config::AccountSection;

// ============================================================================
// Host checks
// ============================================================================

/// Whether `user` exists on the host.
pub fn user_exists(pool: &SessionPool, target: &Target, user: &str) -> Result<bool> {
    let out = pool
        .run(
            target,
            &RemoteCommand::inspect("id")
                .args(["-u", user])
                .accept_exit_codes(&[0, 1]),
        )
        .with_context(|| format!("checking for user {user} on {target}"))?;
    Ok(out.exit_code == 0)
}

fn group_exists(pool: &SessionPool, target: &Target, group: &str) -> Result<bool> {
    let out = pool
        .run(
            target,
            &RemoteCommand::inspect("getent")
                .args(["group", group])
                .accept_exit_codes(&[0, 2]),
        )
        .with_context(|| format!("checking for group {group} on {target}"))?;
    Ok(out.exit_code == 0)
}

// ============================================================================
// Reset
// ============================================================================

/// Kill every process owned by the service account.
pub fn kill_processes(pool: &SessionPool, target: &Target, user: &str) -> Result<()> {
    // pkill exits 1 when nothing matched
    pool.run(
        target,
        &RemoteCommand::new("pkill")
            .args(["-KILL", "-u", user])
            .accept_exit_codes(&[0, 1]),
    )
    .with_context(|| format!("process teardown for {user} on {target}"))?;
    Ok(())
}

/// Remove shared-memory segments owned by the service account.
pub fn remove_shared_memory(pool: &SessionPool, target: &Target, user: &str) -> Result<usize> {
    let listing = pool
        .run(target, &RemoteCommand::inspect("ipcs").arg("-m"))
        .with_context(|| format!("shared-memory listing on {target}"))?;

    let ids = parse_ipcs_shm(&listing.stdout, user);
    for id in &ids {
        pool.run(target, &RemoteCommand::new("ipcrm").args(["-m", id]))
            .with_context(|| format!("shared-memory cleanup of segment {id} on {target}"))?;
    }
    Ok(ids.len())
}

/// Remove stale database socket lock files in /tmp.
pub fn remove_socket_locks(pool: &SessionPool, target: &Target, user: &str) -> Result<()> {
    pool.run(
        target,
        &RemoteCommand::new("find")
            .args(["/tmp", "-maxdepth", "1", "-name", ".s.PGSQL.*", "-user", user, "-delete"])
            .accept_exit_codes(&[0, 1]),
    )
    .with_context(|| format!("socket lock cleanup on {target}"))?;
    Ok(())
}

/// `rm -rf` each data directory.
pub fn remove_directories(pool: &SessionPool, target: &Target, dirs: &[String]) -> Result<()> {
    for dir in dirs {
        if dir.trim().is_empty() || dir.trim_end_matches('/').is_empty() {
            bail!("refusing to remove '{dir}' on {target}");
        }
        pool.run(target, &RemoteCommand::new("rm").args(["-rf", dir]))
            .with_context(|| format!("leftover data directory removal of {dir} on {target}"))?;
    }
    Ok(())
}

/// Clear everything an earlier install may have left on the host.
///
/// Process, shared-memory and socket cleanup only apply when the service
/// account already exists.
pub fn reset_host(
    pool: &SessionPool,
    target: &Target,
    account: &AccountSection,
    dirs: &[String],
) -> Result<()> {
    if user_exists(pool, target, &account.user)? {
        kill_processes(pool, target, &account.user)?;
        let removed = remove_shared_memory(pool, target, &account.user)?;
        if removed > 0 {
            log::info!("{target}: removed {removed} shared-memory segment(s)");
        }
        remove_socket_locks(pool, target, &account.user)?;
    } else {
        log::debug!("{target}: no {} account, skipping process cleanup", account.user);
    }
    remove_directories(pool, target, dirs)
}

// ============================================================================
// Ensure
// ============================================================================

/// Make sure the service account, its secret and the host's directories
/// exist.
pub fn ensure_host(
    pool: &SessionPool,
    target: &Target,
    assignment: &HostAssignment,
    account: &AccountSection,
    secret: Option<&Secret>,
) -> Result<()> {
    let user = account.user.as_str();
    let group = account.group.as_str();

    if !group_exists(pool, target, group)? {
        pool.run(target, &RemoteCommand::new("groupadd").arg(group))
            .with_context(|| format!("creating group {group} on {target}"))?;
    }

    if !user_exists(pool, target, user)? {
        let home = account.home_dir();
        pool.run(
            target,
            &RemoteCommand::new("useradd").args([
                "-m",
                "-g",
                group,
                "-d",
                home.as_str(),
                "-s",
                account.shell.as_str(),
                user,
            ]),
        )
        .with_context(|| format!("creating user {user} on {target}"))?;
    }

    if let Some(secret) = secret {
        let line = Secret::new(format!("{user}:{}", secret.expose()));
        pool.run(target, &RemoteCommand::new("chpasswd").stdin_secret(line))
            .with_context(|| format!("setting the {user} password on {target}"))?;
    }

    let owner = format!("{user}:{group}");
    for dir in &assignment.directories {
        pool.run(target, &RemoteCommand::new("mkdir").args(["-p", dir]))
            .with_context(|| format!("creating {dir} on {target}"))?;
        pool.run(
            target,
            &RemoteCommand::new("chown").args(["-R", owner.as_str(), dir]),
        )
        .with_context(|| format!("setting ownership of {dir} on {target}"))?;
        pool.run(target, &RemoteCommand::new("chmod").args(["700", dir]))
            .with_context(|| format!("setting permissions of {dir} on {target}"))?;
    }

    Ok(())
}

/// Confirm each directory is owned by the service account.
pub fn verify_ownership(
    pool: &SessionPool,
    target: &Target,
    dirs: &[String],
    user: &str,
) -> Result<()> {
    for dir in dirs {
        let out = pool
            .run(target, &RemoteCommand::inspect("stat").args(["-c", "%U", dir]))
            .with_context(|| format!("checking ownership of {dir} on {target}"))?;
        let owner = out.stdout.trim();
        if owner != user {
            bail!("{dir} on {target} is owned by '{owner}', expected '{user}'");
        }
    }
    Ok(())
}

/// Shared-memory ids owned by `user` in `ipcs -m` output.
///
/// Data rows look like `0x00000000 32768 gpadmin 600 ...`; headers and
/// other owners are ignored.
pub fn parse_ipcs_shm(output: &str, user: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            match fields.as_slice() {
                [key, id, owner, ..]
                    if key.starts_with("0x")
                        && *owner == user
                        && !id.is_empty()
                        && id.chars().all(|c| c.is_ascii_digit()) =>
                {
                    Some((*id).to_string())
                }
                _ => None,
            }
        })
        .collect()
}
