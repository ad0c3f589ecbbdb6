//! Cause-specific linear predictors and absolute risk at a horizon.
//!
//! Pure functions over a patient's covariates and the fixed model constants:
//! no state is read or written anywhere else. Covariates are validated
//! before any transform runs, so a zero tumour size is an error here rather
//! than a -inf linear predictor downstream.

use super::coefficients::{
    self, BreastCauseCoefficients, OtherCauseCoefficients, TreatmentCoefficients,
};
use super::hazard::{BaselineHazardModel, Cause, HazardError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("invalid covariate '{name}' = {value}: {reason}")]
    InvalidCovariate {
        name: &'static str,
        value: f64,
        reason: &'static str,
    },
    #[error(transparent)]
    Hazard(#[from] HazardError),
}

/// How the tumour was found. The unknown state scores with the published
/// attenuated multiplier rather than being treated as missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Detection {
    Symptomatic,
    Screening,
    Unknown,
}

impl Detection {
    pub fn value(self) -> f64 {
        match self {
            Detection::Symptomatic => 0.0,
            Detection::Screening => 1.0,
            Detection::Unknown => 0.204,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MenopausalStatus {
    Pre,
    Post,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChemoGeneration {
    None,
    Second,
    Third,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PatientCovariates {
    pub age: f64,
    pub size_mm: f64,
    /// Histological grade 1..=3.
    pub grade: u8,
    pub nodes: f64,
    pub detection: Detection,
    pub er_positive: bool,
    pub her2_positive: Option<bool>,
    pub ki67_positive: Option<bool>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Treatment {
    pub hormone_therapy: bool,
    pub chemo: ChemoGeneration,
    pub trastuzumab: bool,
    pub menopausal: MenopausalStatus,
}

impl Treatment {
    pub fn none(menopausal: MenopausalStatus) -> Self {
        Self {
            hormone_therapy: false,
            chemo: ChemoGeneration::None,
            trastuzumab: false,
            menopausal,
        }
    }
}

/// One cause's score for one patient at one horizon.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskEstimate {
    pub cause: Cause,
    pub linear_predictor: f64,
    pub survival: f64,
    pub mortality: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TwoCauseRisk {
    pub breast: RiskEstimate,
    pub other: RiskEstimate,
    pub all_cause_survival: f64,
}

/// The full constant set: baseline curves plus regression constants.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskModel {
    pub hazards: BaselineHazardModel,
    pub er_positive: BreastCauseCoefficients,
    pub er_negative: BreastCauseCoefficients,
    pub other: OtherCauseCoefficients,
    pub treatment: TreatmentCoefficients,
}

impl RiskModel {
    /// The published constant set for both causes.
    pub fn published() -> Result<Self, HazardError> {
        Ok(Self {
            hazards: BaselineHazardModel::published()?,
            er_positive: coefficients::er_positive(),
            er_negative: coefficients::er_negative(),
            other: coefficients::other_cause(),
            treatment: coefficients::treatment(),
        })
    }
}

/// Bisphosphonate benefit applies to post-menopausal patients only; when the
/// status is unrecorded, age 50 and over stands in for post-menopausal.
pub fn bisphosphonate_eligible(menopausal: MenopausalStatus, age: f64) -> bool {
    match menopausal {
        MenopausalStatus::Post => true,
        MenopausalStatus::Pre => false,
        MenopausalStatus::Unknown => age >= 50.0,
    }
}

fn validate(patient: &PatientCovariates, horizon: f64) -> Result<(), ScoreError> {
    if !patient.age.is_finite() || patient.age <= 0.0 {
        return Err(ScoreError::InvalidCovariate {
            name: "age",
            value: patient.age,
            reason: "must be positive and finite",
        });
    }
    if !patient.size_mm.is_finite() || patient.size_mm <= 0.0 {
        return Err(ScoreError::InvalidCovariate {
            name: "size",
            value: patient.size_mm,
            reason: "must be strictly positive (log-size term)",
        });
    }
    if !patient.nodes.is_finite() || patient.nodes < 0.0 {
        return Err(ScoreError::InvalidCovariate {
            name: "nodes",
            value: patient.nodes,
            reason: "must be non-negative",
        });
    }
    if !(1..=3).contains(&patient.grade) {
        return Err(ScoreError::InvalidCovariate {
            name: "grade",
            value: patient.grade as f64,
            reason: "must be 1, 2 or 3",
        });
    }
    if !horizon.is_finite() || horizon <= 0.0 {
        return Err(ScoreError::InvalidCovariate {
            name: "horizon",
            value: horizon,
            reason: "must be positive and finite",
        });
    }
    Ok(())
}

fn breast_linear_predictor(
    patient: &PatientCovariates,
    treatment: &Treatment,
    coefficients: &BreastCauseCoefficients,
    effects: &TreatmentCoefficients,
) -> f64 {
    let mut lp = coefficients.age.contribution(patient.age)
        + coefficients.size.contribution(patient.size_mm)
        + coefficients.nodes_beta * (((patient.nodes + 1.0) / 10.0).ln() + coefficients.nodes_offset);

    lp += if coefficients.grade_as_indicator {
        if patient.grade >= 2 {
            coefficients.grade_beta
        } else {
            0.0
        }
    } else {
        coefficients.grade_beta * patient.grade as f64
    };

    lp += coefficients.screen_beta * patient.detection.value();
    lp += match patient.her2_positive {
        Some(true) => coefficients.her2_positive,
        Some(false) => coefficients.her2_negative,
        None => 0.0,
    };
    lp += match patient.ki67_positive {
        Some(true) => coefficients.ki67_positive,
        Some(false) => coefficients.ki67_negative,
        None => 0.0,
    };

    if treatment.hormone_therapy && patient.er_positive {
        lp += effects.hormone_therapy;
    }
    lp += match treatment.chemo {
        ChemoGeneration::None => 0.0,
        ChemoGeneration::Second => effects.chemo_second_generation,
        ChemoGeneration::Third => effects.chemo_third_generation,
    };
    if treatment.trastuzumab && patient.her2_positive == Some(true) {
        lp += effects.trastuzumab;
    }
    if bisphosphonate_eligible(treatment.menopausal, patient.age) {
        lp += effects.bisphosphonates;
    }
    lp
}

/// Proportional-hazards transform of a baseline survival and a linear
/// predictor: survival, then mortality as its complement.
pub fn absolute_mortality(baseline_survival: f64, linear_predictor: f64) -> (f64, f64) {
    let survival = baseline_survival.powf(linear_predictor.exp());
    (survival, 1.0 - survival)
}

/// Scores one patient at `horizon` years for both competing causes.
pub fn score(
    patient: &PatientCovariates,
    treatment: &Treatment,
    horizon: f64,
    model: &RiskModel,
) -> Result<TwoCauseRisk, ScoreError> {
    validate(patient, horizon)?;

    let coefficients = if patient.er_positive {
        &model.er_positive
    } else {
        &model.er_negative
    };
    let lp_breast = breast_linear_predictor(patient, treatment, coefficients, &model.treatment);
    let lp_other = model.other.linear_predictor(patient.age);

    let s0_breast = model.hazards.curve(Cause::BreastCancer).survival(horizon)?;
    let s0_other = model.hazards.curve(Cause::OtherCauses).survival(horizon)?;
    let (surv_breast, mort_breast) = absolute_mortality(s0_breast, lp_breast);
    let (surv_other, mort_other) = absolute_mortality(s0_other, lp_other);

    Ok(TwoCauseRisk {
        breast: RiskEstimate {
            cause: Cause::BreastCancer,
            linear_predictor: lp_breast,
            survival: surv_breast,
            mortality: mort_breast,
        },
        other: RiskEstimate {
            cause: Cause::OtherCauses,
            linear_predictor: lp_other,
            survival: surv_other,
            mortality: mort_other,
        },
        all_cause_survival: surv_breast * surv_other,
    })
}
