use crate::command::{Command, EXIT_FAILURE, EXIT_NOT_FOUND, ExitCode};
use std::borrow::Cow;
use std::env;
use std::ffi::OsStr;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;

/// Run a command that is neither a plugin command nor a builtin.
///
/// The child inherits the shell's standard streams and environment and the
/// shell blocks until it exits. Returns the child's exit code, `128 + n` if
/// it was killed by signal `n`, 127 when the program can't be found or
/// executed, and 1 when the process could not be created for another reason.
pub fn execute_external(cmd: &Command) -> ExitCode {
    let search_paths = env::var_os("PATH").unwrap_or_default();
    let Some(program) = find_command_path(&search_paths, Path::new(&cmd.name)) else {
        eprintln!("lynx: command not found: {}", cmd.name);
        return EXIT_NOT_FOUND;
    };

    let mut child = match std::process::Command::new(program.as_ref())
        .args(&cmd.args)
        .spawn()
    {
        Ok(child) => child,
        Err(err) if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) => {
            log::debug!("exec of {} failed: {}", program.display(), err);
            eprintln!("lynx: command not found: {}", cmd.name);
            return EXIT_NOT_FOUND;
        }
        Err(err) => {
            eprintln!("lynx: failed to start {}: {}", cmd.name, err);
            return EXIT_FAILURE;
        }
    };

    match child.wait() {
        Ok(status) => status.code().unwrap_or_else(|| terminated_by_signal(status)),
        Err(err) => {
            eprintln!("lynx: {}: {}", cmd.name, err);
            EXIT_FAILURE
        }
    }
}

#[cfg(unix)]
fn terminated_by_signal(exit_status: ExitStatus) -> ExitCode {
    use std::os::unix::process::ExitStatusExt;
    if let Some(signal) = ExitStatusExt::signal(&exit_status) {
        128 + signal
    } else if ExitStatusExt::core_dumped(&exit_status) {
        255
    } else {
        -1
    }
}

#[cfg(not(unix))]
fn terminated_by_signal(_exit_status: ExitStatus) -> ExitCode {
    -1
}

/// Resolve a command path the way a typical shell would.
///
/// - Absolute path: returned if it exists.
/// - `./foo`: returned if it exists.
/// - Relative with several components (`bin/tool`): returned if it exists.
/// - Single component: the first existing match in `search_paths` (`PATH`).
/// - Empty path: `None`.
pub fn find_command_path<'a>(search_paths: &OsStr, path: &'a Path) -> Option<Cow<'a, Path>> {
    if path.is_absolute() {
        return find_by_path(path).map(Cow::Borrowed);
    }

    let search_in_current_dir = cfg!(not(unix)) || path.starts_with("./");
    if search_in_current_dir && path.exists() {
        return Some(Cow::Borrowed(path));
    }

    let mut components = path.components();
    match (components.next(), components.next()) {
        (None, None) => None,
        (Some(single), None) => find_in_path(search_paths, single.as_os_str()).map(Cow::Owned),
        _ => find_by_path(path).map(Cow::Borrowed),
    }
}

fn find_in_path(search_paths: &OsStr, cmd: &OsStr) -> Option<PathBuf> {
    env::split_paths(search_paths)
        .map(|dir| dir.join(cmd))
        .find(|candidate| candidate.is_file())
}

fn find_by_path(path: &Path) -> Option<&Path> {
    if path.exists() { Some(path) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::lock_current_dir;
    use std::fs::{self, File};
    use tempfile::TempDir;

    fn command(name: &str, args: &[&str]) -> Command {
        Command::new(name, args.iter().map(|a| a.to_string()).collect())
    }

    #[test]
    #[cfg(unix)]
    fn absolute_existing() {
        let path = Path::new("/bin/sh");
        let found = find_command_path(OsStr::new("/bin"), path).expect("find /bin/sh");
        assert_eq!(found.as_ref(), path);
    }

    #[test]
    #[cfg(unix)]
    fn absolute_missing() {
        let res = find_command_path(OsStr::new("/bin"), Path::new("/bin/nonexisting"));
        assert!(res.is_none());
    }

    #[test]
    #[cfg(unix)]
    fn single_component_found_in_path() {
        let found = find_command_path(OsStr::new("/nowhere:/bin"), Path::new("sh"))
            .expect("find sh via PATH");
        assert_eq!(found.as_ref(), Path::new("/bin/sh"));
    }

    #[test]
    fn single_component_missing_from_path() {
        let res = find_command_path(OsStr::new("/bin"), Path::new("nosuchcmd123"));
        assert!(res.is_none());
    }

    #[test]
    fn empty_path_is_none() {
        assert!(find_command_path(OsStr::new("/bin"), Path::new("")).is_none());
    }

    #[test]
    #[cfg(unix)]
    fn relative_paths_resolve_against_current_dir() {
        let _lock = lock_current_dir();
        let before = env::current_dir().expect("cwd");
        let dir = TempDir::new().expect("temp dir");
        fs::create_dir_all(dir.path().join("bin")).expect("mkdir");
        File::create(dir.path().join("bin").join("tool")).expect("touch");
        File::create(dir.path().join("foo")).expect("touch");

        env::set_current_dir(dir.path()).expect("set cwd");
        let nested = find_command_path(OsStr::new("/bin"), Path::new("bin/tool")).map(|p| p.into_owned());
        let dotted = find_command_path(OsStr::new("/bin"), Path::new("./foo")).map(|p| p.into_owned());
        env::set_current_dir(&before).expect("restore cwd");

        assert_eq!(nested.as_deref(), Some(Path::new("bin/tool")));
        assert_eq!(dotted.as_deref(), Some(Path::new("./foo")));
    }

    #[test]
    #[cfg(unix)]
    fn exit_code_is_passed_through() {
        assert_eq!(execute_external(&command("sh", &["-c", "exit 3"])), 3);
        assert_eq!(execute_external(&command("/bin/sh", &["-c", "true"])), 0);
    }

    #[test]
    #[cfg(unix)]
    fn killed_child_maps_to_128_plus_signal() {
        assert_eq!(execute_external(&command("sh", &["-c", "kill -9 $$"])), 128 + 9);
    }

    #[test]
    fn unknown_command_is_127() {
        assert_eq!(execute_external(&command("nosuchcmd123", &[])), EXIT_NOT_FOUND);
    }

    #[test]
    #[cfg(unix)]
    fn non_executable_file_is_127() {
        let dir = TempDir::new().expect("temp dir");
        let script = dir.path().join("script");
        fs::write(&script, "echo hi\n").expect("write");
        let name = script.to_string_lossy();
        assert_eq!(execute_external(&command(&name, &[])), EXIT_NOT_FOUND);
    }
}
