//! JSON calibration records on disk.
//!
//! Layout under the data directory:
//!
//! ```text
//! Cameras/<id>/color.json        {"format": "color", "colors": [{name, lower, upper}]}
//! Cameras/<id>/intrinsic.json    {"format": "intrinsic", "K": mat, "distort": mat}
//! Cameras/<id>/extrinsic.json    {"format": "extrinsic", "T": mat, "world": mat}
//! Controllers/<serial>/gyro.json {"format": "gyro", "offsets": {x, y, z}}
//! ```
//!
//! Matrices are stored as `{"rows", "cols", "data"}` with row-major data.
//! Serials have `:` replaced by `-` to stay valid as directory names.

use std::fs;
use std::path::{Path, PathBuf};

use nalgebra::{DMatrix, Matrix3, Matrix3x4, Vector3};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use super::{CameraCalibration, Extrinsics};
use crate::geometry::transform::homogeneous_from_dynamic;
use crate::geometry::{Distortion, Intrinsics};
use crate::imu::ImuCalibration;
use crate::tracking::tracked_object::HsvColorRange;

pub const CAMERAS_DIR: &str = "Cameras";
pub const CONTROLLERS_DIR: &str = "Controllers";

#[derive(thiserror::Error, Debug)]
pub enum CalibrationError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{}: expected format '{expected}', found '{found}'", path.display())]
    Format {
        path: PathBuf,
        expected: &'static str,
        found: String,
    },
    #[error("matrix '{name}' is {rows}x{cols}, expected {expected}")]
    Shape {
        name: &'static str,
        rows: usize,
        cols: usize,
        expected: &'static str,
    },
    #[error("matrix '{name}' declares {rows}x{cols} but holds {len} values")]
    DataLength {
        name: &'static str,
        rows: usize,
        cols: usize,
        len: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixRecord {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f64>,
}

impl MatrixRecord {
    pub fn from_dmatrix(m: &DMatrix<f64>) -> Self {
        Self {
            rows: m.nrows(),
            cols: m.ncols(),
            data: m.transpose().iter().copied().collect(),
        }
    }

    pub fn to_dmatrix(&self, name: &'static str) -> Result<DMatrix<f64>, CalibrationError> {
        if self.data.len() != self.rows * self.cols {
            return Err(CalibrationError::DataLength {
                name,
                rows: self.rows,
                cols: self.cols,
                len: self.data.len(),
            });
        }
        Ok(DMatrix::from_row_slice(self.rows, self.cols, &self.data))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Vec3Record {
    x: f64,
    y: f64,
    z: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Vec4Record {
    x: f64,
    y: f64,
    z: f64,
    #[serde(default)]
    w: f64,
}

impl Vec4Record {
    fn to_bound(self) -> [u8; 3] {
        [self.x, self.y, self.z].map(|v| v.round().clamp(0.0, 255.0) as u8)
    }

    fn from_bound(b: [u8; 3]) -> Self {
        Self {
            x: b[0] as f64,
            y: b[1] as f64,
            z: b[2] as f64,
            w: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ColorEntry {
    name: String,
    lower: Vec4Record,
    upper: Vec4Record,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ColorFile {
    format: String,
    colors: Vec<ColorEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IntrinsicFile {
    format: String,
    #[serde(rename = "K")]
    k: MatrixRecord,
    distort: MatrixRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ExtrinsicFile {
    format: String,
    #[serde(rename = "T")]
    t: MatrixRecord,
    world: MatrixRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GyroFile {
    format: String,
    offsets: Vec3Record,
}

fn check_format(path: &Path, expected: &'static str, found: &str) -> Result<(), CalibrationError> {
    if found == expected {
        Ok(())
    } else {
        Err(CalibrationError::Format {
            path: path.to_path_buf(),
            expected,
            found: found.to_string(),
        })
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, CalibrationError> {
    let raw = fs::read_to_string(path).map_err(|source| CalibrationError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| CalibrationError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), CalibrationError> {
    let io_err = |source: std::io::Error| CalibrationError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let json = serde_json::to_string_pretty(value).map_err(|source| CalibrationError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, json).map_err(io_err)?;
    info!(path = %path.display(), "saved calibration");
    Ok(())
}

pub fn serial_to_dirname(serial: &str) -> String {
    serial.replace(':', "-")
}

/// Calibration records rooted at a data directory.
#[derive(Debug, Clone)]
pub struct CalibrationStore {
    root: PathBuf,
}

impl CalibrationStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn camera_path(&self, camera_id: usize, name: &str) -> PathBuf {
        self.root
            .join(CAMERAS_DIR)
            .join(camera_id.to_string())
            .join(format!("{name}.json"))
    }

    fn gyro_path(&self, serial: &str) -> PathBuf {
        self.root
            .join(CONTROLLERS_DIR)
            .join(serial_to_dirname(serial))
            .join("gyro.json")
    }

    pub fn load_colors(&self, camera_id: usize) -> Result<Vec<(String, HsvColorRange)>, CalibrationError> {
        let path = self.camera_path(camera_id, "color");
        let file: ColorFile = read_json(&path)?;
        check_format(&path, "color", &file.format)?;
        Ok(file
            .colors
            .into_iter()
            .map(|c| (c.name, HsvColorRange::new(c.lower.to_bound(), c.upper.to_bound())))
            .collect())
    }

    pub fn load_intrinsics(&self, camera_id: usize) -> Result<Intrinsics, CalibrationError> {
        let path = self.camera_path(camera_id, "intrinsic");
        let file: IntrinsicFile = read_json(&path)?;
        check_format(&path, "intrinsic", &file.format)?;

        let k = file.k.to_dmatrix("K")?;
        if k.shape() != (3, 3) {
            return Err(CalibrationError::Shape {
                name: "K",
                rows: k.nrows(),
                cols: k.ncols(),
                expected: "3x3",
            });
        }
        let distort = file.distort.to_dmatrix("distort")?;
        Ok(Intrinsics::new(
            Matrix3::from_iterator(k.iter().copied()),
            Distortion::from_coefficients(distort.as_slice()),
        ))
    }

    pub fn load_extrinsics(&self, camera_id: usize) -> Result<Extrinsics, CalibrationError> {
        let path = self.camera_path(camera_id, "extrinsic");
        let file: ExtrinsicFile = read_json(&path)?;
        check_format(&path, "extrinsic", &file.format)?;

        let t = file.t.to_dmatrix("T")?;
        if t.shape() != (3, 4) {
            return Err(CalibrationError::Shape {
                name: "T",
                rows: t.nrows(),
                cols: t.ncols(),
                expected: "3x4",
            });
        }
        let world = file.world.to_dmatrix("world")?;
        let world = homogeneous_from_dynamic(&world).ok_or(CalibrationError::Shape {
            name: "world",
            rows: world.nrows(),
            cols: world.ncols(),
            expected: "3x4 or 4x4",
        })?;
        Ok(Extrinsics {
            t: Matrix3x4::from_iterator(t.iter().copied()),
            world,
        })
    }

    pub fn load_gyro(&self, serial: &str) -> Result<ImuCalibration, CalibrationError> {
        let path = self.gyro_path(serial);
        let file: GyroFile = read_json(&path)?;
        check_format(&path, "gyro", &file.format)?;
        let o = file.offsets;
        Ok(ImuCalibration {
            gyro_offsets: Some(Vector3::new(o.x as f32, o.y as f32, o.z as f32)),
        })
    }

    /// Load everything available for one camera. Missing or corrupt parts are
    /// logged and left empty.
    pub fn load_camera(&self, camera_id: usize) -> CameraCalibration {
        let mut calib = CameraCalibration::new(camera_id);

        match self.load_colors(camera_id) {
            Ok(colors) => {
                info!(camera_id, count = colors.len(), "loaded colour calibration");
                calib.colors = colors.into_iter().collect();
            }
            Err(e) => warn!(camera_id, "colour calibration unavailable, detection disabled: {e}"),
        }
        match self.load_intrinsics(camera_id) {
            Ok(intrinsics) => calib.intrinsics = Some(intrinsics),
            Err(e) => warn!(camera_id, "intrinsic calibration unavailable: {e}"),
        }
        match self.load_extrinsics(camera_id) {
            Ok(extrinsics) => calib.extrinsics = Some(extrinsics),
            Err(e) => warn!(camera_id, "extrinsic calibration unavailable: {e}"),
        }
        calib
    }

    /// Gyro offsets for a controller, or an uncalibrated default.
    pub fn load_controller(&self, serial: &str) -> ImuCalibration {
        match self.load_gyro(serial) {
            Ok(calib) => {
                info!(serial, "loaded gyro calibration");
                calib
            }
            Err(e) => {
                warn!(serial, "gyro calibration unavailable, this may cause drift: {e}");
                ImuCalibration::default()
            }
        }
    }

    pub fn save_colors(&self, camera_id: usize, colors: &[(String, HsvColorRange)]) -> Result<(), CalibrationError> {
        let file = ColorFile {
            format: "color".into(),
            colors: colors
                .iter()
                .map(|(name, range)| ColorEntry {
                    name: name.clone(),
                    lower: Vec4Record::from_bound(range.lower),
                    upper: Vec4Record::from_bound(range.upper),
                })
                .collect(),
        };
        write_json(&self.camera_path(camera_id, "color"), &file)
    }

    pub fn save_intrinsics(&self, camera_id: usize, intrinsics: &Intrinsics) -> Result<(), CalibrationError> {
        let d = intrinsics.distortion;
        let file = IntrinsicFile {
            format: "intrinsic".into(),
            k: MatrixRecord::from_dmatrix(&DMatrix::from_iterator(3, 3, intrinsics.k.iter().copied())),
            distort: MatrixRecord {
                rows: 1,
                cols: 5,
                data: vec![d.k1, d.k2, d.p1, d.p2, d.k3],
            },
        };
        write_json(&self.camera_path(camera_id, "intrinsic"), &file)
    }

    pub fn save_extrinsics(&self, camera_id: usize, extrinsics: &Extrinsics) -> Result<(), CalibrationError> {
        let file = ExtrinsicFile {
            format: "extrinsic".into(),
            t: MatrixRecord::from_dmatrix(&DMatrix::from_iterator(3, 4, extrinsics.t.iter().copied())),
            world: MatrixRecord::from_dmatrix(&DMatrix::from_iterator(4, 4, extrinsics.world.iter().copied())),
        };
        write_json(&self.camera_path(camera_id, "extrinsic"), &file)
    }

    pub fn save_gyro(&self, serial: &str, calibration: &ImuCalibration) -> Result<(), CalibrationError> {
        let o = calibration.gyro_offsets.unwrap_or_else(Vector3::zeros);
        let file = GyroFile {
            format: "gyro".into(),
            offsets: Vec3Record {
                x: o.x as f64,
                y: o.y as f64,
                z: o.z as f64,
            },
        };
        write_json(&self.gyro_path(serial), &file)
    }

    pub fn save_camera(&self, calib: &CameraCalibration) -> Result<(), CalibrationError> {
        if calib.has_color() {
            let mut colors: Vec<_> = calib.colors.iter().map(|(n, c)| (n.clone(), *c)).collect();
            colors.sort_by(|a, b| a.0.cmp(&b.0));
            self.save_colors(calib.camera_id, &colors)?;
        }
        if let Some(intrinsics) = &calib.intrinsics {
            self.save_intrinsics(calib.camera_id, intrinsics)?;
        }
        if let Some(extrinsics) = &calib.extrinsics {
            self.save_extrinsics(calib.camera_id, extrinsics)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Matrix4;

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    #[test]
    fn test_matrix_record_is_row_major() {
        let rec = MatrixRecord {
            rows: 2,
            cols: 3,
            data: vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
        };
        let m = rec.to_dmatrix("m").unwrap();
        assert_eq!(m[(0, 2)], 3.0);
        assert_eq!(m[(1, 0)], 4.0);
        assert_eq!(MatrixRecord::from_dmatrix(&m).data, rec.data);
    }

    #[test]
    fn test_load_handwritten_camera() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "Cameras/0/color.json",
            r#"{"format": "color", "colors": [
                {"name": "purple", "lower": {"x": 140, "y": 100, "z": 100, "w": 0},
                                   "upper": {"x": 160, "y": 255, "z": 255, "w": 0}}]}"#,
        );
        write(
            dir.path(),
            "Cameras/0/intrinsic.json",
            r#"{"format": "intrinsic",
                "K": {"rows": 3, "cols": 3, "data": [600, 0, 320, 0, 610, 240, 0, 0, 1]},
                "distort": {"rows": 1, "cols": 4, "data": [-0.1, 0.01, 0.0, 0.0]}}"#,
        );
        write(
            dir.path(),
            "Cameras/0/extrinsic.json",
            r#"{"format": "extrinsic",
                "T": {"rows": 3, "cols": 4, "data": [1, 0, 0, 0, 0, 1, 0, 0, 0, 0, 1, 0]},
                "world": {"rows": 3, "cols": 4, "data": [1, 0, 0, 10, 0, 1, 0, 20, 0, 0, 1, 30]}}"#,
        );

        let calib = CalibrationStore::new(dir.path()).load_camera(0);
        assert_eq!(
            calib.color_range("purple"),
            Some(HsvColorRange::new([140, 100, 100], [160, 255, 255]))
        );
        let intr = calib.intrinsics.unwrap();
        assert_eq!(intr.fy(), 610.0);
        assert_eq!(intr.cx(), 320.0);
        assert_relative_eq!(intr.distortion.k1, -0.1);
        let ext = calib.extrinsics.unwrap();
        assert_eq!(ext.world[(1, 3)], 20.0);
        assert_eq!(ext.world[(3, 3)], 1.0);
        assert!(calib.projection().is_some());
    }

    #[test]
    fn test_missing_and_corrupt_parts_degrade() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "Cameras/1/intrinsic.json", "{ not json");
        write(
            dir.path(),
            "Cameras/1/extrinsic.json",
            r#"{"format": "gyro", "T": {"rows": 0, "cols": 0, "data": []},
                "world": {"rows": 0, "cols": 0, "data": []}}"#,
        );

        let store = CalibrationStore::new(dir.path());
        let calib = store.load_camera(1);
        assert!(!calib.has_color());
        assert!(!calib.has_intrinsic());
        assert!(!calib.has_extrinsic());
        assert!(matches!(store.load_intrinsics(1), Err(CalibrationError::Json { .. })));
        assert!(matches!(store.load_extrinsics(1), Err(CalibrationError::Format { .. })));
        assert!(matches!(store.load_colors(1), Err(CalibrationError::Io { .. })));
    }

    #[test]
    fn test_bad_matrix_shape() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "Cameras/0/intrinsic.json",
            r#"{"format": "intrinsic",
                "K": {"rows": 2, "cols": 2, "data": [1, 0, 0, 1]},
                "distort": {"rows": 1, "cols": 0, "data": []}}"#,
        );
        let err = CalibrationStore::new(dir.path()).load_intrinsics(0).unwrap_err();
        assert!(matches!(err, CalibrationError::Shape { name: "K", .. }));
    }

    #[test]
    fn test_saved_camera_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = CalibrationStore::new(dir.path());

        let mut calib = CameraCalibration::new(2);
        calib.colors.insert("cyan".into(), HsvColorRange::new([80, 90, 100], [100, 255, 255]));
        let mut intr = Intrinsics::from_focal(500.0, 505.0, 300.0, 200.0);
        intr.distortion = Distortion::from_coefficients(&[-0.2, 0.05, 0.001, 0.002, 0.0]);
        calib.intrinsics = Some(intr);
        let mut world = Matrix4::identity();
        world[(0, 3)] = -15.0;
        let mut t = Matrix3x4::zeros();
        t.fixed_view_mut::<3, 3>(0, 0).copy_from(&Matrix3::identity());
        t[(2, 3)] = 7.5;
        calib.extrinsics = Some(Extrinsics { t, world });

        store.save_camera(&calib).unwrap();
        let loaded = store.load_camera(2);
        assert_eq!(loaded.colors, calib.colors);
        assert_eq!(loaded.intrinsics, calib.intrinsics);
        assert_eq!(loaded.extrinsics, calib.extrinsics);
    }

    #[test]
    fn test_gyro_path_uses_dashes() {
        let dir = tempfile::tempdir().unwrap();
        let store = CalibrationStore::new(dir.path());
        let calib = ImuCalibration {
            gyro_offsets: Some(Vector3::new(0.01, -0.02, 0.005)),
        };
        store.save_gyro("00:06:f7:aa:bb:cc", &calib).unwrap();
        assert!(dir.path().join("Controllers/00-06-f7-aa-bb-cc/gyro.json").exists());

        let loaded = store.load_controller("00:06:f7:aa:bb:cc");
        assert_relative_eq!(loaded.gyro_offsets.unwrap(), calib.gyro_offsets.unwrap());
        assert!(!store.load_controller("unknown").has_gyro());
    }
}
