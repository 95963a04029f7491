//! Aggregation and statistical comparison of survey responses

pub mod aggregate;
pub mod baseline;
pub mod comparator;
pub mod stats;

pub use aggregate::{mean, population_std, sample_std, summarize, verify_complete, AggregateError, SummaryStat};
pub use baseline::{HumanBaseline, JoinedSummaryRow, SurveyLayout};
pub use comparator::{CategoryComparator, ComparisonResult, ComparisonStatus, ModelScores};
pub use stats::{one_way_anova, ptukey, qtukey, tukey_hsd, AnovaResult, TukeyComparison, TukeyTable};
