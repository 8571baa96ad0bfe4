use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::execution::{
    CommandSpec, ProcessExecutor, ProcessExitStatus, ProcessOutput, ProcessSpawnRequest,
    spawn_validated,
};
use crate::gateway::{EngineGateway, EngineResult};
use crate::models::{
    CoreError, CoreErrorKind, EngineCommand, EngineOperation, EnginePackage, EngineRunResult,
};
use crate::settings::OrchestratorSettings;

/// Gateway that drives the `choco` command line through a [`ProcessExecutor`].
pub struct ChocolateyGateway {
    executor: Arc<dyn ProcessExecutor>,
    program: PathBuf,
    timeout: Option<Duration>,
    allow_unofficial: bool,
}

impl ChocolateyGateway {
    pub fn new(executor: Arc<dyn ProcessExecutor>, settings: &OrchestratorSettings) -> Self {
        Self {
            executor,
            program: settings.engine_program().to_path_buf(),
            timeout: settings.engine_timeout(),
            allow_unofficial: settings.allow_unofficial(),
        }
    }

    fn spawn_request(&self, command: &EngineCommand) -> ProcessSpawnRequest {
        let command = command
            .clone()
            .with_allow_unofficial(command.allow_unofficial() && self.allow_unofficial);
        let spec = CommandSpec::new(&self.program).args(engine_command_args(&command));
        ProcessSpawnRequest::new(command.operation(), spec).timeout(self.timeout)
    }
}

impl EngineGateway for ChocolateyGateway {
    fn list_installed(&self) -> EngineResult<Vec<EnginePackage>> {
        let request = self.spawn_request(&EngineCommand::list_installed());
        let output = run_to_completion(self.executor.as_ref(), request)?;

        match output.status {
            ProcessExitStatus::ExitCode(0) => {
                let stdout = String::from_utf8(output.stdout).map_err(|error| {
                    CoreError::new(
                        CoreErrorKind::ParseFailure,
                        format!("engine list output is not valid UTF-8: {error}"),
                    )
                    .with_operation(EngineOperation::List)
                })?;
                parse_installed_packages(&stdout)
            }
            ProcessExitStatus::ExitCode(code) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(CoreError::new(
                    CoreErrorKind::ProcessFailure,
                    format!("engine list exited with code {code}: {}", stderr.trim()),
                )
                .with_operation(EngineOperation::List))
            }
            ProcessExitStatus::Terminated => Err(terminated(EngineOperation::List)),
        }
    }

    fn run(&self, command: &EngineCommand) -> EngineResult<EngineRunResult> {
        let operation = command.operation();
        let request = self.spawn_request(command);
        let output = run_to_completion(self.executor.as_ref(), request)?;

        match output.status {
            ProcessExitStatus::ExitCode(exit_code) => Ok(EngineRunResult {
                exit_code,
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }),
            ProcessExitStatus::Terminated => Err(terminated(operation)),
        }
    }
}

/// Renders a command descriptor into engine arguments.
pub fn engine_command_args(command: &EngineCommand) -> Vec<String> {
    let mut args = vec![command.operation().command_name().to_string()];

    if let Some(package) = command.package() {
        args.push(package.as_str().to_string());
    }
    if let Some(version) = command.version() {
        args.push("--version".to_string());
        args.push(version.as_str().to_string());
    }
    if let Some(source) = command.source() {
        args.push("--source".to_string());
        args.push(source.as_str().to_string());
    }
    if command.local_only() {
        args.push("--local-only".to_string());
    }
    if command.force() {
        args.push("--force".to_string());
    }
    if command.allow_unofficial() {
        args.push("--allow-unofficial".to_string());
    }
    if command.operation().is_mutating() {
        args.push("--yes".to_string());
    }
    args.push("--limit-output".to_string());

    args
}

/// Parses `--limit-output` listing lines of the form `id|version`.
pub fn parse_installed_packages(output: &str) -> EngineResult<Vec<EnginePackage>> {
    let mut parsed = Vec::new();
    let mut malformed_lines = 0usize;

    for line in output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
    {
        match parse_installed_line(line) {
            Some(package) => parsed.push(package),
            None => {
                malformed_lines += 1;
                tracing::debug!(line, "skipping malformed engine list line");
            }
        }
    }

    if parsed.is_empty() && malformed_lines > 0 {
        return Err(CoreError::new(
            CoreErrorKind::ParseFailure,
            "unable to parse any installed package lines from engine output",
        )
        .with_operation(EngineOperation::List));
    }

    Ok(parsed)
}

fn parse_installed_line(line: &str) -> Option<EnginePackage> {
    let mut fields = line.split('|').map(str::trim);
    let id = fields.next().filter(|id| !id.is_empty())?;
    let version = fields.next().filter(|version| !version.is_empty())?;
    if fields.next().is_some() {
        return None;
    }

    Some(EnginePackage {
        id: id.to_owned(),
        version: version.to_owned(),
        source: None,
    })
}

fn run_to_completion(
    executor: &dyn ProcessExecutor,
    request: ProcessSpawnRequest,
) -> EngineResult<ProcessOutput> {
    let handle = tokio::runtime::Handle::try_current().map_err(|error| {
        CoreError::internal(format!("engine gateway requires a Tokio runtime: {error}"))
    })?;
    let operation = request.operation;

    let pending = {
        let _runtime = handle.enter();
        spawn_validated(executor, request)?
    };
    let output = handle.block_on(pending)?;
    tracing::debug!(
        operation = ?operation,
        status = ?output.status,
        elapsed_ms = output.elapsed.as_millis() as u64,
        "engine process finished"
    );
    Ok(output)
}

fn terminated(operation: EngineOperation) -> CoreError {
    CoreError::new(
        CoreErrorKind::ProcessFailure,
        "engine process was terminated by signal",
    )
    .with_operation(operation)
}

#[cfg(test)]
mod tests {
    use super::{engine_command_args, parse_installed_packages};
    use crate::models::{
        CoreErrorKind, EngineCommand, PackageId, PackageVersion, SourceUri,
    };

    #[test]
    fn list_command_renders_local_only() {
        assert_eq!(
            engine_command_args(&EngineCommand::list_installed()),
            vec!["list", "--local-only", "--allow-unofficial", "--limit-output"]
        );
    }

    #[test]
    fn install_command_renders_every_option() {
        let command = EngineCommand::install(PackageId::new("Foo").unwrap())
            .with_version(Some(PackageVersion::parse("1.2.3").unwrap()))
            .with_source(Some(SourceUri::new("https://example.test/api/v2").unwrap()))
            .with_force(true);

        assert_eq!(
            engine_command_args(&command),
            vec![
                "install",
                "Foo",
                "--version",
                "1.2.3",
                "--source",
                "https://example.test/api/v2",
                "--force",
                "--allow-unofficial",
                "--yes",
                "--limit-output",
            ]
        );
    }

    #[test]
    fn upgrade_without_unofficial_builds() {
        let command = EngineCommand::upgrade(PackageId::new("git").unwrap())
            .with_allow_unofficial(false);
        assert_eq!(
            engine_command_args(&command),
            vec!["upgrade", "git", "--yes", "--limit-output"]
        );
    }

    #[test]
    fn parses_pipe_delimited_listing() {
        let output = "chocolatey|2.2.2\n\n7zip|23.1.0\ngit.install|2.43.0.1\n";
        let packages = parse_installed_packages(output).unwrap();

        assert_eq!(packages.len(), 3);
        assert_eq!(packages[0].id, "chocolatey");
        assert_eq!(packages[2].version, "2.43.0.1");
        assert!(packages.iter().all(|package| package.source.is_none()));
    }

    #[test]
    fn skips_noise_lines_when_some_lines_parse() {
        let output = "Chocolatey v2.2.2\nfoo|1.0.0\n2 packages installed.\n";
        let packages = parse_installed_packages(output).unwrap();
        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].id, "foo");
    }

    #[test]
    fn empty_listing_is_not_an_error() {
        assert!(parse_installed_packages("\n\n").unwrap().is_empty());
    }

    #[test]
    fn fails_when_nothing_parses() {
        let error = parse_installed_packages("garbage\nmore garbage|\n").unwrap_err();
        assert_eq!(error.kind, CoreErrorKind::ParseFailure);
    }
}
