/// Spatial hyperparameters shared by kernel-windowed layers.
///
/// Values arrive as untyped string pairs; unknown keys and malformed values
/// are ignored so callers can feed one configuration stream to every
/// component. Validation happens at connection init.
#[derive(Debug, Clone)]
pub struct LayerParam {
    pub kernel_height: usize,
    pub kernel_width: usize,
    pub stride: usize,
    pub pad_y: usize,
    pub pad_x: usize,
}

impl Default for LayerParam {
    fn default() -> Self {
        Self {
            kernel_height: 0,
            kernel_width: 0,
            stride: 1,
            pad_y: 0,
            pad_x: 0,
        }
    }
}

impl LayerParam {
    pub fn set_param(&mut self, name: &str, val: &str) {
        let Ok(v) = val.parse() else {
            return;
        };
        match name {
            "kernel_height" => self.kernel_height = v,
            "kernel_width" => self.kernel_width = v,
            "kernel_size" => {
                self.kernel_height = v;
                self.kernel_width = v;
            }
            "stride" => self.stride = v,
            "pad_y" => self.pad_y = v,
            "pad_x" => self.pad_x = v,
            "pad" => {
                self.pad_y = v;
                self.pad_x = v;
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognized_keys_parse() {
        let mut p = LayerParam::default();
        p.set_param("kernel_size", "3");
        p.set_param("stride", "2");
        p.set_param("pad_y", "1");
        assert_eq!(p.kernel_height, 3);
        assert_eq!(p.kernel_width, 3);
        assert_eq!(p.stride, 2);
        assert_eq!(p.pad_y, 1);
        assert_eq!(p.pad_x, 0);
    }

    #[test]
    fn unknown_and_malformed_are_ignored() {
        let mut p = LayerParam::default();
        p.set_param("learning_rate", "0.1");
        p.set_param("stride", "two");
        assert_eq!(p.stride, 1);
    }
}
