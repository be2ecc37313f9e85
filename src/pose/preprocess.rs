use anyhow::{Context, Result};
use ndarray::Array4;
use opencv::{
    core::{AlgorithmHint, Mat, Size, Vec3f, CV_32FC3},
    imgproc,
    prelude::*,
};

/// MoveNet用の入力サイズ
pub const MOVENET_INPUT_SIZE: i32 = 192;

/// カメラの BGR フレームを MoveNet 入力テンソル [1, 192, 192, 3] (RGB, 0.0-255.0) に変換する
///
/// 中間バッファはフレーム間で使い回す。
pub struct MovenetPreprocessor {
    rgb: Mat,
    resized: Mat,
    float_mat: Mat,
}

impl MovenetPreprocessor {
    pub fn new() -> Self {
        Self {
            rgb: Mat::default(),
            resized: Mat::default(),
            float_mat: Mat::default(),
        }
    }

    pub fn run(&mut self, frame: &Mat) -> Result<Array4<f32>> {
        imgproc::cvt_color(
            frame,
            &mut self.rgb,
            imgproc::COLOR_BGR2RGB,
            0,
            AlgorithmHint::ALGO_HINT_DEFAULT,
        )?;
        imgproc::resize(
            &self.rgb,
            &mut self.resized,
            Size::new(MOVENET_INPUT_SIZE, MOVENET_INPUT_SIZE),
            0.0,
            0.0,
            imgproc::INTER_LINEAR,
        )?;
        self.resized.convert_to(&mut self.float_mat, CV_32FC3, 1.0, 0.0)?;

        let pixels: &[Vec3f] = self
            .float_mat
            .data_typed::<Vec3f>()
            .context("resized frame is not continuous")?;
        let flat: Vec<f32> = pixels.iter().flat_map(|p| [p[0], p[1], p[2]]).collect();

        let size = MOVENET_INPUT_SIZE as usize;
        Ok(Array4::from_shape_vec((1, size, size, 3), flat)?)
    }
}

impl Default for MovenetPreprocessor {
    fn default() -> Self {
        Self::new()
    }
}
