use super::first_file_in;
use super::process::run_logged;
use crate::foreground::Segmenter;
use crate::{nii, BinaryMask, Volume, VerifyError, VerifyResult};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use walkdir::WalkDir;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

const TOOL: &str = "nnUNet";

/// 训练好的 nnU-Net 模型目录名.
const DEFAULT_TRAINER_DIR: &str = "nnUNetTrainer__nnUNetPlans__3d_fullres";

const CHECKPOINT_FINAL: &str = "checkpoint_final.pth";
const CHECKPOINT_BEST: &str = "checkpoint_best.pth";

/// nnU-Net 要求的单模态输入文件名.
const INPUT_CASE: &str = "case001_0000.nii.gz";

/// nnU-Net 推理配置. 所有路径与设备信息都显式传入, 只作用于子进程.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NnUnetConfig {
    /// 训练结果根目录 (`nnUNet_results`), 模型目录位于其下.
    pub results_root: PathBuf,

    /// `nnUNet_raw`.
    pub raw_root: PathBuf,

    /// `nnUNet_preprocessed`.
    pub preprocessed_root: PathBuf,

    /// GPU 编号 (`CUDA_VISIBLE_DEVICES`).
    pub device: u32,

    /// 数据增强进程数 (`nnUNet_n_proc_DA`).
    pub workers: usize,

    /// 单次推理的超时.
    pub timeout: Duration,

    /// 滑动窗口步长.
    pub step_size: f64,

    /// 推理命令.
    pub executable: PathBuf,
}

impl Default for NnUnetConfig {
    /// 以用户主目录下的 `nnUNet`, `nnUNet_raw`, `nnUNet_preprocessed` 为根目录,
    /// GPU 0, 12 个数据增强进程, 1 小时超时.
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_default();
        Self {
            results_root: home.join("nnUNet"),
            raw_root: home.join("nnUNet_raw"),
            preprocessed_root: home.join("nnUNet_preprocessed"),
            device: 0,
            workers: 12,
            timeout: Duration::from_secs(3600),
            step_size: 0.7,
            executable: PathBuf::from("nnUNetv2_predict_from_modelfolder"),
        }
    }
}

/// 选定的模型目录、检查点和折.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    /// 模型目录 (含 `dataset.json` 与 `plans.json`).
    pub root: PathBuf,

    /// 检查点文件名.
    pub checkpoint: &'static str,

    /// 参与集成的折, 例如 `["all"]` 或 `["0", "1", "2"]`.
    pub folds: Vec<String>,
}

/// 目录是否是一个完整的模型目录?
#[inline]
fn is_model_dir(dir: &Path) -> bool {
    dir.join("dataset.json").is_file() && dir.join("plans.json").is_file()
}

/// nnU-Net 推理进程.
#[derive(Debug, Clone, Default)]
pub struct NnUnet {
    config: NnUnetConfig,
}

impl NnUnet {
    /// 以 `config` 创建.
    pub fn new(config: NnUnetConfig) -> Self {
        Self { config }
    }

    /// 获取配置.
    #[inline]
    pub fn config(&self) -> &NnUnetConfig {
        &self.config
    }

    /// 查找模型 `model` 的根目录.
    ///
    /// 依次尝试 `<results>/<model>`, 其下的默认训练器目录,
    /// 以及按文件名顺序遍历到的第一个含有 `dataset.json` 与 `plans.json` 的子目录.
    pub fn model_root(&self, model: &str) -> VerifyResult<PathBuf> {
        let base = self.config.results_root.join(model);
        if !base.is_dir() {
            return Err(VerifyError::collaborator(
                TOOL,
                format!("model not found: {}", base.display()),
            ));
        }
        if is_model_dir(&base) {
            return Ok(base);
        }
        let trainer = base.join(DEFAULT_TRAINER_DIR);
        if is_model_dir(&trainer) {
            return Ok(trainer);
        }
        WalkDir::new(&base)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .find(|e| e.file_type().is_dir() && is_model_dir(e.path()))
            .map(|e| e.into_path())
            .ok_or_else(|| {
                VerifyError::collaborator(TOOL, format!("no model root under {}", base.display()))
            })
    }

    /// 在模型目录下选择检查点和折.
    ///
    /// 存在 `fold_all` 时使用它 (优先 `checkpoint_final.pth`, 否则 `checkpoint_best.pth`);
    /// 否则使用所有 `fold_*` 目录 (按名称排序) 的 `checkpoint_final.pth`.
    pub fn select_folds(root: &Path) -> VerifyResult<ModelSelection> {
        let fold_all = root.join("fold_all");
        if fold_all.is_dir() {
            let checkpoint = if fold_all.join(CHECKPOINT_FINAL).is_file() {
                CHECKPOINT_FINAL
            } else {
                CHECKPOINT_BEST
            };
            return Ok(ModelSelection {
                root: root.to_path_buf(),
                checkpoint,
                folds: vec!["all".to_string()],
            });
        }

        let folds: Vec<String> = WalkDir::new(root)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_dir())
            .filter_map(|e| {
                let name = e.file_name().to_str()?;
                name.strip_prefix("fold_").map(str::to_string)
            })
            .collect();
        if folds.is_empty() {
            return Err(VerifyError::collaborator(
                TOOL,
                format!("no fold_all or fold_* directory in {}", root.display()),
            ));
        }
        Ok(ModelSelection {
            root: root.to_path_buf(),
            checkpoint: CHECKPOINT_FINAL,
            folds,
        })
    }

    /// 构建推理命令. 环境变量只设置在子进程上.
    fn command(&self, sel: &ModelSelection, in_dir: &Path, out_dir: &Path) -> Command {
        let cfg = &self.config;
        let mut cmd = Command::new(&cfg.executable);
        cmd.arg("-i")
            .arg(in_dir)
            .arg("-o")
            .arg(out_dir)
            .arg("-m")
            .arg(&sel.root)
            .args(["-chk", sel.checkpoint, "-f"])
            .args(&sel.folds)
            .arg("-step_size")
            .arg(cfg.step_size.to_string())
            .env("nnUNet_raw", &cfg.raw_root)
            .env("nnUNet_preprocessed", &cfg.preprocessed_root)
            .env("nnUNet_results", &cfg.results_root)
            .env("nnUNet_n_proc_DA", cfg.workers.to_string())
            .env("CUDA_VISIBLE_DEVICES", cfg.device.to_string());
        cmd
    }

    /// 用模型 `model` 对 nii 文件 `input` 做推理.
    ///
    /// 输入被复制到 `<workdir>/<tag>_input/case001_0000.nii.gz`, 结果写入
    /// `<workdir>/<tag>_pred`, 子进程的 stderr 写入 `<workdir>/<tag>.log`.
    /// `workdir` 的生命周期由调用方管理.
    ///
    /// # 返回值
    ///
    /// 输出目录中按名称排序的第一个 `*.nii.gz`.
    pub fn predict(&self, model: &str, input: &Path, workdir: &Path, tag: &str) -> VerifyResult<PathBuf> {
        if !input.is_file() {
            return Err(VerifyError::MissingInput(input.to_path_buf()));
        }
        let sel = Self::select_folds(&self.model_root(model)?)?;
        tracing::debug!(model, root = %sel.root.display(), folds = ?sel.folds, checkpoint = sel.checkpoint);

        let in_dir = workdir.join(format!("{tag}_input"));
        let out_dir = workdir.join(format!("{tag}_pred"));
        fs::create_dir_all(&in_dir)?;
        fs::create_dir_all(&out_dir)?;
        fs::copy(input, in_dir.join(INPUT_CASE))?;

        let log = workdir.join(format!("{tag}.log"));
        let cmd = self.command(&sel, &in_dir, &out_dir);
        run_logged(TOOL, cmd, Some(self.config.timeout), &log)?;

        first_file_in(&out_dir, |n| n.ends_with(".nii.gz")).ok_or_else(|| {
            VerifyError::collaborator(TOOL, format!("no prediction in {}", out_dir.display()))
        })
    }
}

/// 以 nnU-Net 模型实现 [`Segmenter`].
///
/// nnU-Net 只接受磁盘上的文件, 因此分割的对象是 `source` 文件本身,
/// 传入 [`Segmenter::segment`] 的体数据只用于日志.
#[derive(Debug, Clone)]
pub struct NnUnetSegmenter<'a> {
    runner: &'a NnUnet,
    model: &'a str,
    source: &'a Path,
    workdir: &'a Path,
    tag: &'a str,
}

impl<'a> NnUnetSegmenter<'a> {
    /// 用 `runner` 的模型 `model` 分割 `source`, 中间文件放在 `workdir` 下以 `tag` 区分.
    pub fn new(runner: &'a NnUnet, model: &'a str, source: &'a Path, workdir: &'a Path, tag: &'a str) -> Self {
        Self {
            runner,
            model,
            source,
            workdir,
            tag,
        }
    }
}

impl Segmenter for NnUnetSegmenter<'_> {
    fn segment(&self, candidate: &Volume) -> VerifyResult<BinaryMask> {
        tracing::debug!(model = self.model, shape = ?crate::GridAttr::shape(candidate), "running segmentation");
        let pred = self.runner.predict(self.model, self.source, self.workdir, self.tag)?;
        nii::read_mask(pred, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(p: &Path) {
        if let Some(parent) = p.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(p, b"{}").unwrap();
    }

    fn runner_at(root: &Path) -> NnUnet {
        NnUnet::new(NnUnetConfig {
            results_root: root.to_path_buf(),
            ..NnUnetConfig::default()
        })
    }

    #[test]
    fn test_model_root_resolution() {
        let dir = tempdir().unwrap();
        let runner = runner_at(dir.path());

        // 直接位于模型目录.
        touch(&dir.path().join("A/dataset.json"));
        touch(&dir.path().join("A/plans.json"));
        assert_eq!(runner.model_root("A").unwrap(), dir.path().join("A"));

        // 默认训练器目录.
        touch(&dir.path().join("B").join(DEFAULT_TRAINER_DIR).join("dataset.json"));
        touch(&dir.path().join("B").join(DEFAULT_TRAINER_DIR).join("plans.json"));
        touch(&dir.path().join("B/aaa/dataset.json"));
        touch(&dir.path().join("B/aaa/plans.json"));
        assert_eq!(
            runner.model_root("B").unwrap(),
            dir.path().join("B").join(DEFAULT_TRAINER_DIR)
        );

        // 深层搜索, 按名称顺序.
        touch(&dir.path().join("C/x/deep/dataset.json"));
        touch(&dir.path().join("C/x/deep/plans.json"));
        touch(&dir.path().join("C/y/dataset.json"));
        touch(&dir.path().join("C/y/plans.json"));
        assert_eq!(runner.model_root("C").unwrap(), dir.path().join("C/x/deep"));

        // 缺少 plans.json.
        touch(&dir.path().join("D/dataset.json"));
        assert!(runner.model_root("D").unwrap_err().is_collaborator());
        assert!(runner.model_root("missing").unwrap_err().is_collaborator());
    }

    #[test]
    fn test_fold_selection() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        assert!(NnUnet::select_folds(root).is_err());

        fs::create_dir_all(root.join("fold_3")).unwrap();
        fs::create_dir_all(root.join("fold_0")).unwrap();
        let sel = NnUnet::select_folds(root).unwrap();
        assert_eq!(sel.folds, vec!["0", "3"]);
        assert_eq!(sel.checkpoint, CHECKPOINT_FINAL);

        fs::create_dir_all(root.join("fold_all")).unwrap();
        let sel = NnUnet::select_folds(root).unwrap();
        assert_eq!(sel.folds, vec!["all"]);
        assert_eq!(sel.checkpoint, CHECKPOINT_BEST);
        touch(&root.join("fold_all").join(CHECKPOINT_FINAL));
        assert_eq!(NnUnet::select_folds(root).unwrap().checkpoint, CHECKPOINT_FINAL);
    }

    #[cfg(unix)]
    #[test]
    fn test_predict_with_fake_executable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let results = dir.path().join("results");
        touch(&results.join("M/dataset.json"));
        touch(&results.join("M/plans.json"));
        fs::create_dir_all(results.join("M/fold_all")).unwrap();

        // 把输入原样复制为预测结果, 并记录 GPU 编号.
        let exe = dir.path().join("fake_predict");
        fs::write(
            &exe,
            "#!/bin/sh\n\
             while [ $# -gt 0 ]; do\n\
               case \"$1\" in\n\
                 -i) in=\"$2\"; shift;;\n\
                 -o) out=\"$2\"; shift;;\n\
               esac\n\
               shift\n\
             done\n\
             echo \"$CUDA_VISIBLE_DEVICES\" > \"$out/../device.txt\"\n\
             cp \"$in/case001_0000.nii.gz\" \"$out/case001.nii.gz\"\n",
        )
        .unwrap();
        fs::set_permissions(&exe, fs::Permissions::from_mode(0o755)).unwrap();

        let input = dir.path().join("defaced.nii.gz");
        fs::write(&input, b"not really nifti").unwrap();
        let work = dir.path().join("work");
        fs::create_dir_all(&work).unwrap();

        let runner = NnUnet::new(NnUnetConfig {
            results_root: results,
            device: 3,
            executable: exe,
            ..NnUnetConfig::default()
        });
        let pred = runner.predict("M", &input, &work, "pred804").unwrap();
        assert_eq!(pred, work.join("pred804_pred/case001.nii.gz"));
        assert_eq!(fs::read_to_string(work.join("device.txt")).unwrap().trim(), "3");
        assert!(work.join("pred804_input").join(INPUT_CASE).is_file());
        // 当前进程的环境没有被修改.
        assert_ne!(std::env::var("CUDA_VISIBLE_DEVICES").ok().as_deref(), Some("3"));
    }
}
