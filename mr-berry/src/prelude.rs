//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx3d, Shape3d, VoxelIndex};

pub use crate::{
    ravel_index, unravel_index, voxel_coordinates, FeatureTable, MrScan, NiftiHeaderAttr,
    PredictionTable, RoiMask,
};

pub use crate::consts::{file, DEFAULT_MAXIMUM_DISTANCE, DEFAULT_SLOPE};

pub use crate::dataset::{self, home_dataset_dir_with, list_patients, Patient};

pub use crate::roi::{locate_roi, NearestRoi, RoiPoints, RoiSource};

pub use crate::post_proc::{
    attenuation_factor, correct_proba, dense_crf_smooth, otsu_threshold, DenseCrfConfig,
};

pub use crate::model::{FittedModel, ProbaModel};

pub use crate::pipeline::{
    run_batch, run_patient, BatchReport, FailureKind, PatientReport, PatientStatus,
    PipelineConfig,
};
