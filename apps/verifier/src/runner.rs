//! 程序运行函数.

use crate::result::{BatchResult, Outcome};
use crate::Args;
use anyhow::{bail, Context};
use deface_berry::collab::{Dcm2Niix, NnUnet, NnUnetConfig, NnUnetSegmenter, FOREGROUND_MODEL, REMOVAL_MODEL};
use deface_berry::foreground::SegmentedForeground;
use deface_berry::nii;
use deface_berry::pipeline::{MetricResult, SubjectInputs, VerificationPipeline};
use deface_berry::VerifyError;
use std::path::PathBuf;
use std::time::Duration;
use utils::loader::{self, Subject};

/// 保留区域掩膜的二值化阈值.
const KEPT_THRESHOLD: f64 = 0.5;

/// 批量验证器. 所有配置在创建时确定.
#[derive(Debug, Clone)]
pub struct Runner {
    raw_root: PathBuf,
    pipeline: VerificationPipeline,
    nnunet: NnUnet,
    dcm2niix: Dcm2Niix,
}

impl Runner {
    /// 由命令行参数创建. 未指定的模型根目录取 `$nnUNet_results` 或 `$HOME/nnUNet`.
    pub fn from_args(args: &Args) -> Self {
        let mut config = NnUnetConfig {
            results_root: args
                .model_root
                .clone()
                .unwrap_or_else(loader::model_root_from_env_or_home),
            device: args.gpu,
            ..NnUnetConfig::default()
        };
        let mut dcm2niix = Dcm2Niix::default();
        if let Some(secs) = args.timeout {
            config.timeout = Duration::from_secs(secs);
            dcm2niix = dcm2niix.with_timeout(config.timeout);
        }
        tracing::debug!(?config, "nnU-Net configuration");

        Self::new(
            args.raw.clone(),
            VerificationPipeline::default(),
            NnUnet::new(config),
            dcm2niix,
        )
    }

    pub fn new(raw_root: PathBuf, pipeline: VerificationPipeline, nnunet: NnUnet, dcm2niix: Dcm2Niix) -> Self {
        Self {
            raw_root,
            pipeline,
            nnunet,
            dcm2niix,
        }
    }

    /// 验证单个受试者. 临时工作目录在任何退出路径上都会被删除.
    ///
    /// 去脸扫描或保留掩膜缺失时, 在调用任何外部工具之前返回 [`VerifyError::MissingInput`].
    pub fn verify(&self, subject: &Subject) -> anyhow::Result<MetricResult> {
        for path in [subject.defaced(), subject.kept_mask()] {
            if !path.is_file() {
                return Err(VerifyError::MissingInput(path).into());
            }
        }

        let raw_dir = subject.raw_dir(&self.raw_root);
        let Some(dicom_dir) = loader::find_raw_dicom_dir(&raw_dir) else {
            bail!("no DICOM series found under {}", raw_dir.display());
        };
        tracing::debug!(subject = %subject.name, dicom = %dicom_dir.display());

        let tmp = tempfile::Builder::new()
            .prefix(&format!("deface_verify_{}_", subject.name))
            .tempdir()
            .context("cannot create working directory")?;
        let work = tmp.path();

        let raw_nii = self
            .dcm2niix
            .convert(&dicom_dir, &work.join("raw_nii"))
            .context("DICOM conversion failed")?;

        let defaced = subject.defaced();
        let predicted = self
            .nnunet
            .predict(REMOVAL_MODEL, &defaced, work, "removal")
            .context("removal region prediction failed")?;

        let inputs = SubjectInputs {
            raw: nii::read_volume(&raw_nii)?,
            candidate: nii::read_volume(&defaced)?,
            kept: nii::read_mask(subject.kept_mask(), KEPT_THRESHOLD)?,
            predicted: nii::read_mask(&predicted, 0.0)?,
        };

        let foreground = SegmentedForeground::new(NnUnetSegmenter::new(
            &self.nnunet,
            FOREGROUND_MODEL,
            &defaced,
            work,
            "foreground",
        ));
        Ok(self.pipeline.run(&inputs, &foreground)?)
    }

    fn verify_logged(&self, subject: &Subject) -> (String, Outcome) {
        tracing::info!("Verifying subject `{}`", subject.name);
        let outcome = match self.verify(subject) {
            Ok(r) => {
                tracing::info!(
                    "Subject `{}`: {}",
                    subject.name,
                    deface_berry::gate::pass_fail(r.passed)
                );
                Outcome::Verified(r)
            }
            Err(e) => {
                tracing::error!("Subject `{}` failed to verify: {e:#}", subject.name);
                Outcome::Failed(format!("{e:#}"))
            }
        };
        (subject.name.clone(), outcome)
    }

    /// 验证全部受试者, 最多 `jobs` 个同时进行. 结果按 `subjects` 的顺序排列.
    pub fn run(&self, subjects: &[Subject], jobs: usize) -> anyhow::Result<BatchResult> {
        let targets = *self.pipeline.targets();
        let jobs = jobs.clamp(1, utils::cpus());
        if jobs == 1 {
            return Ok(BatchResult::from_iter(
                targets,
                subjects.iter().map(|s| self.verify_logged(s)),
            ));
        }

        cfg_if::cfg_if! {
            if #[cfg(feature = "rayon")] {
                use rayon::prelude::*;

                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(jobs)
                    .build()
                    .context("cannot build thread pool")?;
                let data: Vec<_> =
                    pool.install(|| subjects.par_iter().map(|s| self.verify_logged(s)).collect());
                Ok(BatchResult::from_iter(targets, data))
            } else {
                tracing::warn!("Built without `rayon`, verifying {jobs} jobs sequentially");
                Ok(BatchResult::from_iter(
                    targets,
                    subjects.iter().map(|s| self.verify_logged(s)),
                ))
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    /// 写一个只创建 `marker` 然后失败的假可执行文件.
    fn fake_tool(dir: &Path, name: &str, marker: &Path) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\ntouch '{}'\nexit 1\n", marker.display())).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_missing_kept_mask_stops_before_external_tools() {
        let root = tempfile::tempdir().unwrap();
        let subject = Subject {
            name: "sub01".to_string(),
            dir: root.path().join("defaced").join("sub01"),
        };
        fs::create_dir_all(&subject.dir).unwrap();
        fs::write(subject.defaced(), b"not really a volume").unwrap();

        let raw_root = root.path().join("raw");
        let series = raw_root.join("sub01").join("series");
        fs::create_dir_all(&series).unwrap();
        for i in 0..loader::MIN_DICOM_FILES {
            fs::write(series.join(format!("{i:03}.dcm")), b"").unwrap();
        }

        let bin = root.path().join("bin");
        fs::create_dir_all(&bin).unwrap();
        let converted = root.path().join("dcm2niix.ran");
        let predicted = root.path().join("nnunet.ran");
        let dcm2niix = Dcm2Niix::default().with_executable(fake_tool(&bin, "dcm2niix", &converted));
        let nnunet = NnUnet::new(NnUnetConfig {
            results_root: root.path().join("models"),
            executable: fake_tool(&bin, "nnUNetv2_predict", &predicted),
            ..NnUnetConfig::default()
        });
        let runner = Runner::new(raw_root, VerificationPipeline::default(), nnunet, dcm2niix);

        let err = runner.verify(&subject).unwrap_err();
        match err.downcast_ref::<VerifyError>() {
            Some(VerifyError::MissingInput(p)) => assert!(p.ends_with(loader::KEPT_MASK_FILE)),
            other => panic!("unexpected error: {other:?} ({err:#})"),
        }
        assert!(!converted.exists());
        assert!(!predicted.exists());
    }

    #[test]
    fn test_missing_defaced_scan_is_reported_first() {
        let root = tempfile::tempdir().unwrap();
        let subject = Subject {
            name: "sub02".to_string(),
            dir: root.path().join("sub02"),
        };
        let runner = Runner::new(
            root.path().join("raw"),
            VerificationPipeline::default(),
            NnUnet::new(NnUnetConfig::default()),
            Dcm2Niix::default(),
        );

        let err = runner.verify(&subject).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<VerifyError>(),
            Some(VerifyError::MissingInput(p)) if p.ends_with(loader::DEFACED_FILE)
        ));
    }
}
