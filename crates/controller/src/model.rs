//! Stock irrigation recommender: a small rule set over the same three
//! features a trained classifier would see.

use irrigation_core::link::Inference;
use tracing::debug;

/// Fraction of the dry threshold at which hot weather already calls for water.
const HOT_MARGIN: f32 = 0.8;

pub struct ThresholdModel {
    soil_dry: f32,
    temp_high: f32,
    humidity_high: f32,
}

impl ThresholdModel {
    pub fn new(soil_dry: u16, temp_high: f32, humidity_high: f32) -> Self {
        Self {
            soil_dry: soil_dry as f32,
            temp_high,
            humidity_high,
        }
    }
}

impl Inference for ThresholdModel {
    /// `features` is `[soil_moisture, temperature, humidity]`; a higher soil
    /// reading is drier.
    fn predict(&mut self, features: [f32; 3]) -> bool {
        let [soil, temp, humidity] = features;
        if humidity >= self.humidity_high {
            return false;
        }
        let dry = soil >= self.soil_dry;
        let hot_and_drying = temp >= self.temp_high && soil >= self.soil_dry * HOT_MARGIN;
        let irrigate = dry || hot_and_drying;
        debug!(soil, temp, humidity, irrigate, "model prediction");
        irrigate
    }
}
