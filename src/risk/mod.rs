pub mod coefficients;
pub mod hazard;
pub mod scorer;

pub use hazard::{BaselineHazardModel, Cause, HazardCurve, HazardError};
pub use scorer::{
    ChemoGeneration, Detection, MenopausalStatus, PatientCovariates, RiskEstimate, RiskModel,
    ScoreError, Treatment, TwoCauseRisk, absolute_mortality, bisphosphonate_eligible, score,
};
