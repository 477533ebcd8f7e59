//! 验证结果与报告.

use deface_berry::gate::{pass_fail, VerificationTargets};
use deface_berry::pipeline::MetricResult;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

const S4: &str = "    ";

/// 单个受试者的验证结果.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// 得到了指标.
    Verified(MetricResult),

    /// 流程中途失败, 附带错误信息.
    Failed(String),
}

/// 将受试者 `name` 的结果写进 `w` 中.
fn describe_into<W: Write>(
    name: &str,
    outcome: &Outcome,
    t: &VerificationTargets,
    w: &mut W,
) -> io::Result<()> {
    writeln!(w, "Subject `{name}`:")?;
    let r = match outcome {
        Outcome::Verified(r) => r,
        Outcome::Failed(msg) => return write!(w, "{S4}Failed to verify: {msg}"),
    };
    let v = &r.verdict;
    writeln!(
        w,
        "{S4}Surface DSC: {:.4} (target >= {:.2}) {}",
        r.surface_dsc,
        t.surface_dsc_min,
        pass_fail(v.surface_dsc)
    )?;
    writeln!(
        w,
        "{S4}HD95: {:.2} mm (target <= {:.2} mm) {}",
        r.hd95_mm,
        t.hd95_mm_max,
        pass_fail(v.hd95)
    )?;
    writeln!(
        w,
        "{S4}SSIM (defaced region): {:.4} (target <= {:.2}) {}",
        r.ssim,
        t.ssim_max,
        pass_fail(v.ssim)
    )?;
    writeln!(
        w,
        "{S4}PSNR (defaced region): {:.2} dB (target <= {:.2} dB) {}",
        r.psnr_db,
        t.psnr_db_max,
        pass_fail(v.psnr)
    )?;
    writeln!(w, "{S4}Volume DSC: {:.4}", r.volume_dsc)?;
    writeln!(w, "{S4}Predicted removal voxels: {}", r.predicted_voxel_count)?;
    writeln!(w, "{S4}Tool removal voxels: {}", r.tool_voxel_count)?;
    write!(w, "{S4}Overall: {}", pass_fail(r.passed))
}

/// 整批验证的最终结果.
#[derive(Debug, Clone)]
pub struct BatchResult {
    targets: VerificationTargets,
    data: Vec<(String, Outcome)>,
}

impl BatchResult {
    /// 按受试者顺序收集.
    pub fn from_iter<I: IntoIterator<Item = (String, Outcome)>>(
        targets: VerificationTargets,
        it: I,
    ) -> Self {
        Self {
            targets,
            data: it.into_iter().collect(),
        }
    }

    /// 受试者总数.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// 得到指标的受试者数.
    pub fn verified(&self) -> usize {
        self.metrics().count()
    }

    /// 流程失败的受试者数.
    #[inline]
    pub fn failed(&self) -> usize {
        self.len() - self.verified()
    }

    /// 通过判定的受试者数.
    pub fn passed(&self) -> usize {
        self.metrics().filter(|r| r.passed).count()
    }

    /// 通过率 (以得到指标的受试者为分母). 没有任何受试者得到指标时为 `None`.
    pub fn pass_rate(&self) -> Option<f64> {
        let n = self.verified();
        (n > 0).then(|| self.passed() as f64 / n as f64)
    }

    /// 是否每个受试者都得到了指标. 与判定结果无关.
    #[inline]
    pub fn all_verified(&self) -> bool {
        self.failed() == 0
    }

    fn metrics(&self) -> impl Iterator<Item = &MetricResult> {
        self.data.iter().filter_map(|(_, o)| match o {
            Outcome::Verified(r) => Some(r),
            Outcome::Failed(_) => None,
        })
    }

    fn summary_into<W: Write>(&self, w: &mut W) -> io::Result<()> {
        writeln!(w, "Summary:")?;
        writeln!(w, "{S4}Subjects: {}", self.len())?;
        writeln!(w, "{S4}Verified: {}", self.verified())?;
        writeln!(w, "{S4}Failed to verify: {}", self.failed())?;
        writeln!(w, "{S4}Passed: {}", self.passed())?;
        match self.pass_rate() {
            Some(r) => write!(w, "{S4}Pass rate: {:.1}%", r * 100.0),
            None => write!(w, "{S4}Pass rate: /"),
        }
    }

    /// 写出完整的文本报告: 目标阈值, 每个受试者的结果, 汇总.
    pub fn report_into<W: Write>(&self, w: &mut W) -> io::Result<()> {
        writeln!(w, "Defacing verification report")?;
        writeln!(w, "Targets: {}", self.targets)?;
        self.analyze_into(w)
    }

    /// 将每个受试者的逐项判定和汇总依次写进 `w` 中, 以分隔线隔开.
    pub fn analyze_into<W: Write>(&self, w: &mut W) -> io::Result<()> {
        utils::sep_to(&mut *w)?;
        for (name, outcome) in self.data.iter() {
            describe_into(name, outcome, &self.targets, w)?;
            writeln!(w)?;
            utils::sep_to(&mut *w)?;
        }
        self.summary_into(w)?;
        writeln!(w)?;
        utils::sep_to(w)
    }

    /// 在终端打印每个受试者的结果和汇总.
    pub fn analyze(&self) -> io::Result<()> {
        let stdout = io::stdout();
        let mut lock = stdout.lock();
        self.analyze_into(&mut lock)?;
        lock.flush()
    }

    /// 将文本报告写入 `path`.
    pub fn write_report(&self, path: &Path) -> io::Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        self.report_into(&mut w)?;
        w.flush()
    }

    /// 转换为 JSON. 非有限的浮点数 (`+inf`) 记为 `null`.
    #[cfg(feature = "serde")]
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        use serde_json::{json, Value};

        let subjects = self
            .data
            .iter()
            .map(|(name, outcome)| {
                Ok(match outcome {
                    Outcome::Verified(r) => json!({
                        "subject": name,
                        "status": "verified",
                        "metrics": serde_json::to_value(r)?,
                    }),
                    Outcome::Failed(msg) => json!({
                        "subject": name,
                        "status": "failed",
                        "error": msg,
                    }),
                })
            })
            .collect::<serde_json::Result<Vec<Value>>>()?;

        Ok(json!({
            "targets": serde_json::to_value(self.targets)?,
            "subjects": subjects,
            "summary": {
                "subjects": self.len(),
                "verified": self.verified(),
                "failed": self.failed(),
                "passed": self.passed(),
                "pass_rate": self.pass_rate(),
            },
        }))
    }

    /// 将 JSON 报告写入 `path`.
    #[cfg(feature = "serde")]
    pub fn write_json(&self, path: &Path) -> io::Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut w, &self.to_json()?)?;
        w.flush()
    }
}
