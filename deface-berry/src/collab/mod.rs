//! 外部组件适配: DICOM -> nii 格式转换 (`dcm2niix`), 以及 nnU-Net 分割推理.
//!
//! 所有外部组件都以阻塞子进程的方式调用. 环境变量只设置在子进程上,
//! 从不修改当前进程的环境.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

mod dcm2niix;
mod nnunet;
mod process;

pub use dcm2niix::Dcm2Niix;
pub use nnunet::{ModelSelection, NnUnet, NnUnetConfig, NnUnetSegmenter};

/// 预测移除区域所用的 nnU-Net 模型名.
pub const REMOVAL_MODEL: &str = "Dataset804_SEG_defaced_areas_all_v2";

/// 解剖前景所用的 nnU-Net 模型名.
pub const FOREGROUND_MODEL: &str = "Dataset803_anatomical_foreground_v2";

/// 按文件名顺序, 找到 `dir` 下 (不递归) 第一个满足 `pred` 的文件.
fn first_file_in(dir: &Path, pred: impl Fn(&str) -> bool) -> Option<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .find(|e| e.file_name().to_str().is_some_and(&pred))
        .map(|e| e.into_path())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_first_file_in_sorted() {
        let dir = tempdir().unwrap();
        for name in ["raw_b.nii.gz", "raw_a.nii.gz", "other.nii.gz"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        fs::create_dir(dir.path().join("raw_0.nii.gz")).unwrap();
        let hit = first_file_in(dir.path(), |n| n.starts_with("raw") && n.ends_with(".nii.gz"));
        assert_eq!(hit, Some(dir.path().join("raw_a.nii.gz")));
        assert_eq!(first_file_in(dir.path(), |n| n.ends_with(".json")), None);
    }
}
