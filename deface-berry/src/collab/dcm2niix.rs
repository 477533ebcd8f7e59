use super::first_file_in;
use super::process::run_logged;
use crate::{VerifyError, VerifyResult};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

const TOOL: &str = "dcm2niix";

/// `dcm2niix` 格式转换器.
#[derive(Debug, Clone)]
pub struct Dcm2Niix {
    executable: PathBuf,
    timeout: Option<Duration>,
}

impl Default for Dcm2Niix {
    fn default() -> Self {
        Self {
            executable: PathBuf::from(TOOL),
            timeout: None,
        }
    }
}

impl Dcm2Niix {
    /// 指定可执行文件.
    pub fn with_executable(mut self, executable: impl Into<PathBuf>) -> Self {
        self.executable = executable.into();
        self
    }

    /// 指定超时. 默认不限时.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// 将 `dicom_dir` 中的 DICOM 序列转换为 `out_dir/raw*.nii.gz`.
    ///
    /// # 返回值
    ///
    /// 转换结果路径. 优先选择 `raw*.nii.gz`, 其次 `raw*.nii`.
    /// 转换失败或没有产出时返回 [`VerifyError::ExternalCollaborator`].
    pub fn convert(&self, dicom_dir: &Path, out_dir: &Path) -> VerifyResult<PathBuf> {
        fs::create_dir_all(out_dir)?;
        let mut cmd = Command::new(&self.executable);
        cmd.args(["-z", "y", "-f", "raw", "-o"]).arg(out_dir).arg(dicom_dir);

        let log = out_dir.with_extension("dcm2niix.log");
        run_logged(TOOL, cmd, self.timeout, &log)?;

        first_file_in(out_dir, |n| n.starts_with("raw") && n.ends_with(".nii.gz"))
            .or_else(|| first_file_in(out_dir, |n| n.starts_with("raw") && n.ends_with(".nii")))
            .ok_or_else(|| {
                VerifyError::collaborator(TOOL, format!("no NIfTI output in {}", out_dir.display()))
            })
    }
}
