//! 后处理流程集合.

mod attenuate;
mod dense_crf;
mod otsu;

pub use attenuate::{
    attenuation_factor, correct_proba, should_correct, CorrectError, CorrectResult,
};

pub use dense_crf::{dense_crf_smooth, CrfError, DenseCrfConfig, PROBA_EPS};

pub use otsu::{otsu_threshold, OTSU_BINS};
