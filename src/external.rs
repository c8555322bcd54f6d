//! Wrapped command-line utilities.
//!
//! Every call is a child process with a deadline: a non-zero exit becomes
//! [`AodError::ExternalTool`], a missed deadline kills the child and becomes
//! [`AodError::ToolTimeout`].

use crate::types::AodError;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Longest stderr excerpt kept in an error.
const STDERR_TAIL: usize = 2000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy())
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, Copy)]
pub struct ToolRunner {
    timeout: Duration,
}

impl ToolRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn from_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    pub async fn run(&self, command: &ToolCommand) -> Result<ToolOutput, AodError> {
        log::debug!("Running {}", command);
        let child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AodError::ExternalTool {
                command: command.to_string(),
                status: "not started".to_string(),
                stderr: e.to_string(),
            })?;

        // dropping the pending wait on timeout drops the child, which kills it
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                return Err(AodError::ToolTimeout {
                    command: command.to_string(),
                    timeout: self.timeout,
                })
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(AodError::ExternalTool {
                command: command.to_string(),
                status: output.status.to_string(),
                stderr: tail(&stderr, STDERR_TAIL).trim().to_string(),
            });
        }
        Ok(ToolOutput { stdout, stderr })
    }
}

fn tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

/// How `gdal_merge.py` treats empty pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeNodata {
    /// Zero is no-data and the output starts zeroed.
    Zero,
    Nan,
}

/// Argument templates for the GDAL command-line utilities.
pub struct GdalUtil;

impl GdalUtil {
    /// `gdal_translate -of GTiff NETCDF:"<src>":<variable> <dst>`
    pub fn netcdf_to_geotiff(src: &Path, variable: &str, dst: &Path) -> ToolCommand {
        ToolCommand::new("gdal_translate")
            .args(["-of", "GTiff"])
            .arg(format!("NETCDF:\"{}\":{}", src.display(), variable))
            .path_arg(dst)
    }

    /// `gdalwarp -t_srs <srs> <src> <dst>`
    pub fn reproject(src: &Path, target_srs: &str, dst: &Path) -> ToolCommand {
        ToolCommand::new("gdalwarp")
            .args(["-t_srs", target_srs])
            .path_arg(src)
            .path_arg(dst)
    }

    /// `gdalwarp -te xmin ymin xmax ymax <src> <dst>`
    pub fn clip(src: &Path, bbox: [f64; 4], dst: &Path) -> ToolCommand {
        ToolCommand::new("gdalwarp")
            .arg("-te")
            .args(bbox.iter().map(|v| v.to_string()))
            .path_arg(src)
            .path_arg(dst)
    }

    /// `gdal_merge.py -n <v> -a_nodata <v> [-init 0] -o <dst> <inputs…>`
    pub fn merge(inputs: &[impl AsRef<Path>], nodata: MergeNodata, dst: &Path) -> ToolCommand {
        let command = ToolCommand::new("gdal_merge.py");
        let command = match nodata {
            MergeNodata::Zero => command.args(["-n", "0", "-a_nodata", "0", "-init", "0"]),
            MergeNodata::Nan => command.args(["-n", "nan", "-a_nodata", "nan"]),
        };
        inputs
            .iter()
            .fold(command.arg("-o").path_arg(dst), |c, input| {
                c.path_arg(input.as_ref())
            })
    }

    /// Tiled BigTIFF copy with square blocks.
    pub fn tile(src: &Path, block_size: u32, dst: &Path) -> ToolCommand {
        ToolCommand::new("gdal_translate")
            .args(["-co", "TILED=YES"])
            .arg("-co")
            .arg(format!("BLOCKXSIZE={}", block_size))
            .arg("-co")
            .arg(format!("BLOCKYSIZE={}", block_size))
            .args(["-co", "BIGTIFF=YES"])
            .path_arg(src)
            .path_arg(dst)
    }

    /// `gdaladdo -r average <path> <levels…>`
    pub fn overviews(path: &Path, levels: &[u32]) -> ToolCommand {
        ToolCommand::new("gdaladdo")
            .args(["-r", "average"])
            .path_arg(path)
            .args(levels.iter().map(|l| l.to_string()))
    }

    /// `gdalinfo -stats <path>`
    pub fn statistics(path: &Path) -> ToolCommand {
        ToolCommand::new("gdalinfo").arg("-stats").path_arg(path)
    }

    /// Write a band's minimum and maximum statistics back into `path`.
    pub fn set_statistics(path: &Path, band: usize, min: f64, max: f64) -> ToolCommand {
        ToolCommand::new("gdal_edit.py")
            .arg("-b")
            .arg(band.to_string())
            .arg("-stats")
            .path_arg(path)
            .arg("-mo")
            .arg(format!("STATISTICS_MINIMUM={}", min))
            .arg("-mo")
            .arg(format!("STATISTICS_MAXIMUM={}", max))
    }
}

pub struct Tar;

impl Tar {
    pub fn list(archive: &Path) -> ToolCommand {
        ToolCommand::new("tar").arg("-tf").path_arg(archive)
    }

    pub fn extract(archive: &Path, members: &[String], dest: &Path) -> ToolCommand {
        ToolCommand::new("tar")
            .arg("-xf")
            .path_arg(archive)
            .arg("-C")
            .path_arg(dest)
            .args(members.iter().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> ToolCommand {
        ToolCommand::new("sh").args(["-c", script])
    }

    #[test]
    fn netcdf_conversion_names_the_subdataset() {
        let cmd = GdalUtil::netcdf_to_geotiff(Path::new("/in/a.nc"), "AOD", Path::new("/t/a.tif"));
        assert_eq!(cmd.program, "gdal_translate");
        assert_eq!(cmd.args, vec!["-of", "GTiff", "NETCDF:\"/in/a.nc\":AOD", "/t/a.tif"]);
    }

    #[test]
    fn clip_passes_the_box_in_gdal_order() {
        let cmd = GdalUtil::clip(
            Path::new("w.tif"),
            [300000.0, 2800000.5, 400000.0, 2900000.0],
            Path::new("o.tif"),
        );
        assert_eq!(
            cmd.to_string(),
            "gdalwarp -te 300000 2800000.5 400000 2900000 w.tif o.tif"
        );
    }

    #[test]
    fn merge_modes() {
        let inputs = [Path::new("a.tif"), Path::new("b.tif")];
        let zero = GdalUtil::merge(&inputs, MergeNodata::Zero, Path::new("m.tif"));
        assert_eq!(
            zero.to_string(),
            "gdal_merge.py -n 0 -a_nodata 0 -init 0 -o m.tif a.tif b.tif"
        );
        let nan = GdalUtil::merge(&inputs, MergeNodata::Nan, Path::new("m.tif"));
        assert!(nan.args.starts_with(&["-n".to_string(), "nan".to_string()]));
    }

    #[test]
    fn statistics_write_back_targets_one_band() {
        let cmd = GdalUtil::set_statistics(Path::new("out.tif"), 2, 0.0, 255.5);
        assert_eq!(
            cmd.to_string(),
            "gdal_edit.py -b 2 -stats out.tif -mo STATISTICS_MINIMUM=0 -mo STATISTICS_MAXIMUM=255.5"
        );
    }

    #[test]
    fn display_quotes_arguments_with_spaces() {
        let cmd = ToolCommand::new("gdalinfo").arg("-stats").arg("my file.tif");
        assert_eq!(cmd.to_string(), "gdalinfo -stats 'my file.tif'");
    }

    #[test]
    fn tail_respects_char_boundaries() {
        assert_eq!(tail("abc", 10), "abc");
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("aé", 1), "");
    }

    #[tokio::test]
    async fn captures_stdout_of_successful_command() {
        let output = ToolRunner::from_secs(10).run(&sh("echo hello")).await.unwrap();
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn non_zero_exit_is_reported_with_status_and_stderr() {
        let err = ToolRunner::from_secs(10)
            .run(&sh("echo broken >&2; exit 3"))
            .await
            .unwrap_err();
        match err {
            AodError::ExternalTool {
                command,
                status,
                stderr,
            } => {
                assert!(command.starts_with("sh -c"));
                assert!(status.contains('3'), "status was {}", status);
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let runner = ToolRunner::new(Duration::from_millis(200));
        let err = runner.run(&sh("sleep 5")).await.unwrap_err();
        assert!(matches!(err, AodError::ToolTimeout { .. }));
    }

    #[tokio::test]
    async fn missing_program_is_a_tool_error() {
        let err = ToolRunner::from_secs(5)
            .run(&ToolCommand::new("definitely-not-an-installed-tool"))
            .await
            .unwrap_err();
        assert!(matches!(err, AodError::ExternalTool { .. }));
    }
}
