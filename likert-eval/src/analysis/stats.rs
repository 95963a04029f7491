//! One-way ANOVA and Tukey HSD post-hoc comparisons
//!
//! The studentized range distribution follows Copenhaver & Holland (1988),
//! the same Gauss-Legendre scheme R's `ptukey` uses.

use indexmap::IndexMap;
use serde::Serialize;
use statrs::distribution::{ContinuousCDF, FisherSnedecor};
use statrs::function::erf::erf;
use statrs::function::gamma::ln_gamma;
use std::f64::consts::{LN_2, SQRT_2};

use super::aggregate::mean;

/// One-way analysis of variance over independent groups
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AnovaResult {
    pub f_statistic: f64,
    pub p_value: f64,
    pub df_between: usize,
    pub df_within: usize,
}

/// `None` unless there are at least two non-empty groups
pub fn one_way_anova(groups: &[&[f64]]) -> Option<AnovaResult> {
    let groups: Vec<&[f64]> = groups.iter().copied().filter(|g| !g.is_empty()).collect();
    let k = groups.len();
    if k < 2 {
        return None;
    }

    let n: usize = groups.iter().map(|g| g.len()).sum();
    let grand_mean = groups.iter().flat_map(|g| g.iter()).sum::<f64>() / n as f64;

    let mut ss_between = 0.0;
    let mut ss_within = 0.0;
    for group in &groups {
        let m = mean(group);
        ss_between += group.len() as f64 * (m - grand_mean).powi(2);
        ss_within += group.iter().map(|v| (v - m).powi(2)).sum::<f64>();
    }

    let df_between = k - 1;
    let df_within = n - k;

    let (f_statistic, p_value) = if df_within == 0 {
        (f64::NAN, f64::NAN)
    } else if ss_within == 0.0 {
        if ss_between > 0.0 {
            (f64::INFINITY, 0.0)
        } else {
            (f64::NAN, f64::NAN)
        }
    } else {
        let f = (ss_between / df_between as f64) / (ss_within / df_within as f64);
        let p = FisherSnedecor::new(df_between as f64, df_within as f64)
            .map(|dist| dist.sf(f))
            .unwrap_or(f64::NAN);
        (f, p)
    };

    Some(AnovaResult {
        f_statistic,
        p_value,
        df_between,
        df_within,
    })
}

/// One pairwise Tukey comparison; `mean_diff` is `mean(group2) - mean(group1)`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TukeyComparison {
    pub group1: String,
    pub group2: String,
    pub mean_diff: f64,
    pub p_adj: f64,
    pub lower: f64,
    pub upper: f64,
    pub reject: bool,
}

/// All pairwise comparisons of a Tukey HSD test
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TukeyTable {
    pub alpha: f64,
    pub q_critical: f64,
    pub df: usize,
    pub comparisons: Vec<TukeyComparison>,
}

impl TukeyTable {
    pub fn get(&self, group1: &str, group2: &str) -> Option<&TukeyComparison> {
        self.comparisons.iter().find(|c| {
            (c.group1 == group1 && c.group2 == group2) || (c.group1 == group2 && c.group2 == group1)
        })
    }
}

/// Tukey-Kramer HSD over labelled groups. Empty groups are ignored; labels
/// are compared in sorted order. `None` with fewer than two groups.
pub fn tukey_hsd(groups: &IndexMap<String, Vec<f64>>, alpha: f64) -> Option<TukeyTable> {
    let mut labelled: Vec<(&str, &[f64])> = groups
        .iter()
        .filter(|(_, values)| !values.is_empty())
        .map(|(label, values)| (label.as_str(), values.as_slice()))
        .collect();
    labelled.sort_by(|a, b| a.0.cmp(b.0));

    let k = labelled.len();
    if k < 2 {
        return None;
    }

    let n: usize = labelled.iter().map(|(_, v)| v.len()).sum();
    let df = n - k;
    let ss_within: f64 = labelled
        .iter()
        .map(|(_, v)| {
            let m = mean(v);
            v.iter().map(|x| (x - m).powi(2)).sum::<f64>()
        })
        .sum();
    let mse = if df > 0 { ss_within / df as f64 } else { f64::NAN };
    let q_critical = qtukey(1.0 - alpha, k, df as f64);

    let mut comparisons = Vec::with_capacity(k * (k - 1) / 2);
    for i in 0..k {
        for j in (i + 1)..k {
            let (label_i, values_i) = labelled[i];
            let (label_j, values_j) = labelled[j];
            let mean_diff = mean(values_j) - mean(values_i);
            let se = (mse / 2.0 * (1.0 / values_i.len() as f64 + 1.0 / values_j.len() as f64)).sqrt();

            let p_adj = if se.is_nan() {
                f64::NAN
            } else if se == 0.0 {
                if mean_diff == 0.0 {
                    1.0
                } else {
                    0.0
                }
            } else {
                (1.0 - ptukey(mean_diff.abs() / se, k, df as f64)).clamp(0.0, 1.0)
            };

            comparisons.push(TukeyComparison {
                group1: label_i.to_string(),
                group2: label_j.to_string(),
                mean_diff,
                p_adj,
                lower: mean_diff - q_critical * se,
                upper: mean_diff + q_critical * se,
                reject: p_adj < alpha,
            });
        }
    }

    Some(TukeyTable {
        alpha,
        q_critical,
        df,
        comparisons,
    })
}

fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / SQRT_2))
}

/// Probability that the range of `cc` standard normals is below `w`
fn wprob(w: f64, cc: f64) -> f64 {
    const BB: f64 = 8.0;
    const WLAR: f64 = 3.0;
    const C1: f64 = -30.0;
    const C3: f64 = 60.0;
    const XLEG: [f64; 6] = [
        0.981_560_634_246_719_3,
        0.904_117_256_370_474_9,
        0.769_902_674_194_304_7,
        0.587_317_954_286_617_4,
        0.367_831_498_998_180_2,
        0.125_233_408_511_468_9,
    ];
    const ALEG: [f64; 6] = [
        0.047_175_336_386_511_83,
        0.106_939_325_995_318_4,
        0.160_078_328_543_346_2,
        0.203_167_426_723_065_9,
        0.233_492_536_538_354_8,
        0.249_147_045_813_402_8,
    ];
    let one_over_sqrt_2pi = 1.0 / (2.0 * std::f64::consts::PI).sqrt();

    let qsqz = w * 0.5;
    if qsqz >= BB {
        return 1.0;
    }

    // P(|Z| < w/2)^cc: all values inside a window of width w centred at 0
    let mut pr_w = 2.0 * normal_cdf(qsqz) - 1.0;
    pr_w = if pr_w >= 1.0 { 1.0 } else { pr_w.powf(cc) };

    let wincr = if w > WLAR { 2 } else { 3 };
    let mut blb = qsqz;
    let binc = (BB - qsqz) / wincr as f64;
    let mut bub = blb + binc;
    let mut einsum = 0.0;
    let cc1 = cc - 1.0;

    for _ in 0..wincr {
        let mut elsum = 0.0;
        let a = 0.5 * (bub + blb);
        let b = 0.5 * (bub - blb);

        for jj in 0..12 {
            let (j, xx) = if jj >= 6 { (11 - jj, XLEG[11 - jj]) } else { (jj, -XLEG[jj]) };
            let ac = a + b * xx;
            let qexpo = ac * ac;
            if qexpo > C3 {
                break;
            }
            let pplus = normal_cdf(ac);
            let pminus = normal_cdf(ac - w);
            let rinsum = pplus - pminus;
            if rinsum >= (C1 / cc1).exp() {
                elsum += ALEG[j] * (-0.5 * qexpo).exp() * rinsum.powf(cc1);
            }
        }

        elsum *= 2.0 * b * cc * one_over_sqrt_2pi;
        einsum += elsum;
        blb = bub;
        bub += binc;
    }

    pr_w += einsum;
    if pr_w <= C1.exp() {
        return 0.0;
    }
    pr_w.min(1.0)
}

// 16-point Gauss-Legendre nodes and weights, one half of the symmetric set
const XLEGQ: [f64; 8] = [
    0.989_400_934_991_649_9,
    0.944_575_023_073_232_6,
    0.865_631_202_387_831_7,
    0.755_404_408_355_003_0,
    0.617_876_244_402_643_7,
    0.458_016_777_657_227_4,
    0.281_603_550_779_258_9,
    0.095_012_509_837_637_44,
];
const ALEGQ: [f64; 8] = [
    0.027_152_459_411_754_09,
    0.062_253_523_938_647_89,
    0.095_158_511_682_492_78,
    0.124_628_971_255_533_9,
    0.149_595_988_816_576_7,
    0.169_156_519_395_002_5,
    0.182_603_415_044_923_6,
    0.189_450_610_455_068_5,
];

/// CDF of the studentized range for `nmeans` groups and `df` degrees of freedom.
/// Defined for `df >= 1`.
pub fn ptukey(q: f64, nmeans: usize, df: f64) -> f64 {
    const EPS1: f64 = -30.0;
    const EPS2: f64 = 1.0e-14;

    let cc = nmeans as f64;
    if q.is_nan() || df.is_nan() || df < 1.0 || nmeans < 2 {
        return f64::NAN;
    }
    if q <= 0.0 {
        return 0.0;
    }
    if q.is_infinite() {
        return 1.0;
    }
    if df < 2.0 {
        return ptukey_low_df(q, cc, df);
    }
    if df > 25_000.0 {
        return wprob(q, cc);
    }

    // Integrate wprob(q * sqrt(u/2)) against the chi density of df
    let f2 = df * 0.5;
    let ulen = if df <= 100.0 {
        1.0
    } else if df <= 800.0 {
        0.5
    } else if df <= 5000.0 {
        0.25
    } else {
        0.125
    };
    let f2lf = f2 * df.ln() - df * LN_2 - ln_gamma(f2) + f64::ln(ulen);
    let f21 = f2 - 1.0;
    let ff4 = df * 0.25;

    let mut ans = 0.0;
    for i in 1..=50 {
        let mut otsum = 0.0;
        let twa1 = (2 * i - 1) as f64 * ulen;

        for jj in 0..16 {
            let (j, upper) = if jj >= 8 { (jj - 8, true) } else { (jj, false) };
            let offset = XLEGQ[j] * ulen;
            let t1 = if upper {
                f2lf + f21 * (twa1 + offset).ln() - (offset + twa1) * ff4
            } else {
                f2lf + f21 * (twa1 - offset).ln() + (offset - twa1) * ff4
            };

            if t1 >= EPS1 {
                let u = if upper { twa1 + offset } else { twa1 - offset };
                let qsqz = q * (u * 0.5).sqrt();
                otsum += wprob(qsqz, cc) * ALEGQ[j] * t1.exp();
            }
        }

        if i as f64 * ulen >= 1.0 && otsum <= EPS2 {
            break;
        }
        ans += otsum;
    }

    ans.min(1.0)
}

/// Below two degrees of freedom the chi density of `u` is unbounded at 0, so
/// integrate over `s = sqrt(u / df)` instead, whose density stays finite.
fn ptukey_low_df(q: f64, cc: f64, df: f64) -> f64 {
    const S_MAX: f64 = 10.0;
    const PANELS: usize = 40;

    let ln_norm = 0.5 * df * df.ln() - ln_gamma(0.5 * df) - (0.5 * df - 1.0) * LN_2;
    let half = 0.5 * S_MAX / PANELS as f64;

    let mut ans = 0.0;
    for panel in 0..PANELS {
        let mid = (2 * panel + 1) as f64 * half;
        for (x, a) in XLEGQ.iter().zip(ALEGQ.iter()) {
            for s in [mid - half * x, mid + half * x] {
                let density = (ln_norm + (df - 1.0) * s.ln() - 0.5 * df * s * s).exp();
                ans += a * half * density * wprob(q * s, cc);
            }
        }
    }

    ans.min(1.0)
}

/// Quantile of the studentized range, by bracketing and bisection
pub fn qtukey(p: f64, nmeans: usize, df: f64) -> f64 {
    if !(0.0..1.0).contains(&p) || nmeans < 2 || df.is_nan() || df < 1.0 {
        return f64::NAN;
    }
    if p == 0.0 {
        return 0.0;
    }

    let mut lo = 0.0;
    let mut hi = 1.0;
    for _ in 0..64 {
        if ptukey(hi, nmeans, df) >= p {
            break;
        }
        lo = hi;
        hi *= 2.0;
    }

    for _ in 0..60 {
        let mid = 0.5 * (lo + hi);
        if ptukey(mid, nmeans, df) < p {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo < 1e-10 {
            break;
        }
    }

    0.5 * (lo + hi)
}
