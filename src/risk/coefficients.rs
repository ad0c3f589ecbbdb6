//! Fixed regression constants for the two cause-specific linear predictors.
//!
//! These are externally fitted model constants, not quantities estimated by
//! this crate. The breast cause carries separate constant sets for
//! ER-positive and ER-negative disease (different fractional-polynomial
//! forms for age and size); the other-cause predictor depends on age alone.
//! Treatment effects are log hazard ratios from trial meta-analyses, added
//! to the breast-cause predictor.

use serde::{Deserialize, Serialize};

/// Age enters the breast-cause predictor through one of two fitted forms.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum AgeEffect {
    /// beta1*((age/10)^-2 - center1) + beta2*((age/10)^-2 * ln(age/10) - center2)
    FractionalPolynomial {
        beta1: f64,
        center1: f64,
        beta2: f64,
        center2: f64,
    },
    /// beta * (age - center)
    Linear { beta: f64, center: f64 },
}

impl AgeEffect {
    pub fn contribution(&self, age: f64) -> f64 {
        match *self {
            AgeEffect::FractionalPolynomial {
                beta1,
                center1,
                beta2,
                center2,
            } => {
                let a = age / 10.0;
                let inv_sq = a.powi(-2);
                beta1 * (inv_sq - center1) + beta2 * (inv_sq * a.ln() - center2)
            }
            AgeEffect::Linear { beta, center } => beta * (age - center),
        }
    }
}

/// Tumour size (mm) enters through one of two fitted transforms.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum SizeEffect {
    /// beta * (ln(size/100) + offset)
    LogRatio { beta: f64, offset: f64 },
    /// beta * (sqrt(size/100) + offset)
    SqrtRatio { beta: f64, offset: f64 },
}

impl SizeEffect {
    pub fn contribution(&self, size_mm: f64) -> f64 {
        match *self {
            SizeEffect::LogRatio { beta, offset } => beta * ((size_mm / 100.0).ln() + offset),
            SizeEffect::SqrtRatio { beta, offset } => beta * ((size_mm / 100.0).sqrt() + offset),
        }
    }
}

/// Constants for the breast-cancer cause, one set per ER status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BreastCauseCoefficients {
    pub age: AgeEffect,
    pub size: SizeEffect,
    /// beta * (ln((nodes + 1) / 10) + offset)
    pub nodes_beta: f64,
    pub nodes_offset: f64,
    /// Applied to the grade value 1..=3, or to a grade >= 2 indicator.
    pub grade_beta: f64,
    pub grade_as_indicator: bool,
    /// Multiplied by the numeric detection value (see `Detection::value`).
    pub screen_beta: f64,
    pub her2_positive: f64,
    pub her2_negative: f64,
    pub ki67_positive: f64,
    pub ki67_negative: f64,
}

/// Constants for the other-cause predictor: beta * ((age/10)^2 - center).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OtherCauseCoefficients {
    pub age_beta: f64,
    pub age_center: f64,
}

impl OtherCauseCoefficients {
    pub fn linear_predictor(&self, age: f64) -> f64 {
        let a = age / 10.0;
        self.age_beta * (a * a - self.age_center)
    }
}

/// Log hazard ratios for adjuvant treatments, applied to the breast cause.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TreatmentCoefficients {
    pub hormone_therapy: f64,
    pub chemo_second_generation: f64,
    pub chemo_third_generation: f64,
    pub trastuzumab: f64,
    pub bisphosphonates: f64,
}

/// Published ER-positive breast-cause constants.
pub fn er_positive() -> BreastCauseCoefficients {
    BreastCauseCoefficients {
        age: AgeEffect::FractionalPolynomial {
            beta1: 34.536_42,
            center1: 0.028_744_929_5,
            beta2: -34.203_42,
            center2: 0.051_012_101_3,
        },
        size: SizeEffect::LogRatio {
            beta: 0.753_072_9,
            offset: 1.545_233_938,
        },
        nodes_beta: 0.706_072_3,
        nodes_offset: 1.387_566_896,
        grade_beta: 0.746_655,
        grade_as_indicator: false,
        screen_beta: -0.227_633_66,
        her2_positive: 0.2413,
        her2_negative: -0.0762,
        ki67_positive: 0.149_04,
        ki67_negative: -0.113_33,
    }
}

/// Published ER-negative breast-cause constants. KI67 carries no effect in
/// ER-negative disease and grade enters as a >= 2 indicator.
pub fn er_negative() -> BreastCauseCoefficients {
    BreastCauseCoefficients {
        age: AgeEffect::Linear {
            beta: 0.008_982_7,
            center: 56.325_490_2,
        },
        size: SizeEffect::SqrtRatio {
            beta: 2.093_446,
            offset: -0.509_045_627_6,
        },
        nodes_beta: 0.626_054_1,
        nodes_offset: 1.086_916_249,
        grade_beta: 1.129_091,
        grade_as_indicator: true,
        screen_beta: 0.0,
        her2_positive: 0.2413,
        her2_negative: -0.0762,
        ki67_positive: 0.0,
        ki67_negative: 0.0,
    }
}

/// Published other-cause constants.
pub fn other_cause() -> OtherCauseCoefficients {
    OtherCauseCoefficients {
        age_beta: 0.069_825_2,
        age_center: 34.233_919_57,
    }
}

/// Published treatment log hazard ratios.
pub fn treatment() -> TreatmentCoefficients {
    TreatmentCoefficients {
        hormone_therapy: -0.3857,
        chemo_second_generation: -0.248,
        chemo_third_generation: -0.446,
        trastuzumab: -0.3567,
        bisphosphonates: -0.198,
    }
}
