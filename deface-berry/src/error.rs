//! 运行时错误.
//!
//! 数值退化 (空掩膜、零方差、零动态范围) 不属于错误, 由各指标自行返回哨兵值.

use std::path::PathBuf;
use thiserror::Error;

/// 单个受试者验证过程中可能出现的错误. 任何错误都只会终止当前受试者.
#[derive(Error, Debug)]
pub enum VerifyError {
    /// 必需的图像或掩膜不存在.
    #[error("Missing input: {}", .0.display())]
    MissingInput(PathBuf),

    /// 外部组件 (格式转换器、分割模型) 返回非零状态、超时或找不到模型.
    #[error("External collaborator `{tool}` failed: {reason}")]
    ExternalCollaborator {
        /// 组件名.
        tool: String,

        /// 失败原因.
        reason: String,
    },

    /// 数据不是三维, 体素间距非法, 或网格无法对齐.
    #[error("Malformed geometry: {0}")]
    MalformedGeometry(String),

    /// 数值参数不合法, 例如负的距离或越界的轴.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// 文件系统错误.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// nii 读写错误.
    #[error(transparent)]
    Nifti(#[from] nifti::NiftiError),
}

/// 验证流程运行时结果.
pub type VerifyResult<T> = Result<T, VerifyError>;

impl VerifyError {
    /// 构造外部组件错误.
    pub fn collaborator(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ExternalCollaborator {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    /// 构造几何错误.
    pub fn geometry(msg: impl Into<String>) -> Self {
        Self::MalformedGeometry(msg.into())
    }

    /// 构造配置错误.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// 该错误是否来自外部组件?
    #[inline]
    pub fn is_collaborator(&self) -> bool {
        matches!(self, Self::ExternalCollaborator { .. })
    }
}
