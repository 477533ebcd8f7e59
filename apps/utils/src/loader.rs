//! 受试者目录与原始 DICOM 序列的查找.
//!
//! 目录布局:
//!
//! ```text
//! <defaced>/<subject>/defaced.nii.gz         去脸后扫描
//! <defaced>/<subject>/defaced_mask.nii.gz    去脸工具输出的保留区域
//! <raw>/<subject>/**/*.dcm                   原始 DICOM 序列
//! ```

use deface_berry::collab::NnUnetConfig;
use std::env;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// 去脸后扫描的文件名.
pub const DEFACED_FILE: &str = "defaced.nii.gz";

/// 保留区域掩膜的文件名.
pub const KEPT_MASK_FILE: &str = "defaced_mask.nii.gz";

/// 一个目录至少包含多少个 DICOM 文件才被视为一个序列.
pub const MIN_DICOM_FILES: usize = 5;

/// DICOM 文件前导区长度, 其后紧跟 `DICM`.
const DICOM_PREAMBLE: usize = 128;

/// 获取 nnU-Net 训练结果根目录.
///
/// 1. 若环境变量 `$nnUNet_results` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/nnUNet`.
pub fn model_root_from_env_or_home() -> PathBuf {
    match env::var("nnUNet_results") {
        Ok(d) if !d.is_empty() => PathBuf::from(d),
        _ => NnUnetConfig::default().results_root,
    }
}

/// 文件是否为 DICOM? 后缀为 `.dcm` / `.dicom` (不区分大小写),
/// 或第 128 字节起为 `DICM`.
pub fn is_dicom_file(path: &Path) -> bool {
    let by_suffix = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("dcm") || e.eq_ignore_ascii_case("dicom"));
    if by_suffix {
        return true;
    }
    let mut head = [0u8; DICOM_PREAMBLE + 4];
    File::open(path)
        .and_then(|mut f| f.read_exact(&mut head))
        .is_ok_and(|_| &head[DICOM_PREAMBLE..] == b"DICM")
}

/// 在 `subject_dir` 下 (含自身, 按文件名顺序深度优先) 找到第一个
/// 直接包含至少 [`MIN_DICOM_FILES`] 个 DICOM 文件的目录.
pub fn find_raw_dicom_dir(subject_dir: &Path) -> Option<PathBuf> {
    WalkDir::new(subject_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_dir())
        .find(|dir| {
            WalkDir::new(dir.path())
                .min_depth(1)
                .max_depth(1)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file() && is_dicom_file(e.path()))
                .take(MIN_DICOM_FILES)
                .count()
                >= MIN_DICOM_FILES
        })
        .map(|e| e.into_path())
}

/// 一个待验证的受试者.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    /// 受试者名, 即目录名.
    pub name: String,

    /// 去脸结果目录.
    pub dir: PathBuf,
}

impl Subject {
    /// 去脸后扫描.
    #[inline]
    pub fn defaced(&self) -> PathBuf {
        self.dir.join(DEFACED_FILE)
    }

    /// 保留区域掩膜.
    #[inline]
    pub fn kept_mask(&self) -> PathBuf {
        self.dir.join(KEPT_MASK_FILE)
    }

    /// 对应的原始 DICOM 根目录 `<raw_root>/<name>`.
    #[inline]
    pub fn raw_dir(&self, raw_root: &Path) -> PathBuf {
        raw_root.join(&self.name)
    }
}

/// 找到 `defaced_root` 下所有包含 `defaced.nii.gz` 的子目录, 按名称排序.
///
/// `filter` 非空时只保留名称在其中的受试者.
pub fn discover_subjects(defaced_root: &Path, filter: &[String]) -> Vec<Subject> {
    WalkDir::new(defaced_root)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_dir() && e.path().join(DEFACED_FILE).is_file())
        .filter_map(|e| {
            let name = e.file_name().to_str()?.to_string();
            Some(Subject {
                name,
                dir: e.into_path(),
            })
        })
        .filter(|s| filter.is_empty() || filter.contains(&s.name))
        .collect()
}
