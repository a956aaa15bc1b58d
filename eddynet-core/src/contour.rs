// Contour geometry
// Per-step contour coordinates and the loaders that read them from datasets

use anyhow::{bail, Context, Result};
use eddynet_common::Dataset;
use std::path::Path;

/// Which contour a step's observations are compared by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContourKind {
    /// Outermost closed contour (`effective_contour_*`)
    #[default]
    Effective,
    /// Contour of maximum mean geostrophic speed (`speed_contour_*`)
    Speed,
}

impl ContourKind {
    /// `intern` selects the inner, speed-based contour
    pub fn from_intern(intern: bool) -> Self {
        if intern {
            ContourKind::Speed
        } else {
            ContourKind::Effective
        }
    }

    /// Dataset variable names holding (longitude, latitude)
    pub fn variable_names(self) -> (&'static str, &'static str) {
        match self {
            ContourKind::Effective => ("effective_contour_longitude", "effective_contour_latitude"),
            ContourKind::Speed => ("speed_contour_longitude", "speed_contour_latitude"),
        }
    }
}

/// Contours of every observation of one step, stored as flat `nb_obs * nb_sample`
/// arrays. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ContourSet {
    nb_obs: usize,
    nb_sample: usize,
    lon: Vec<f64>,
    lat: Vec<f64>,
}

impl ContourSet {
    pub fn new(nb_sample: usize, lon: Vec<f64>, lat: Vec<f64>) -> Result<Self> {
        if lon.len() != lat.len() {
            bail!(
                "longitude and latitude arrays differ in length ({} vs {})",
                lon.len(),
                lat.len()
            );
        }
        if nb_sample == 0 {
            if !lon.is_empty() {
                bail!("contour samples given with a zero sample count");
            }
            return Ok(ContourSet {
                nb_obs: 0,
                nb_sample,
                lon,
                lat,
            });
        }
        if lon.len() % nb_sample != 0 {
            bail!(
                "{} coordinates do not divide into contours of {nb_sample} samples",
                lon.len()
            );
        }
        Ok(ContourSet {
            nb_obs: lon.len() / nb_sample,
            nb_sample,
            lon,
            lat,
        })
    }

    /// Build from one coordinate list per observation; every contour must have the same length
    pub fn from_contours(contours: &[(Vec<f64>, Vec<f64>)]) -> Result<Self> {
        let nb_sample = contours.first().map_or(0, |(x, _)| x.len());
        let mut lon = Vec::with_capacity(contours.len() * nb_sample);
        let mut lat = Vec::with_capacity(contours.len() * nb_sample);
        for (i, (x, y)) in contours.iter().enumerate() {
            if x.len() != nb_sample || y.len() != nb_sample {
                bail!("contour {i} does not have {nb_sample} samples");
            }
            lon.extend_from_slice(x);
            lat.extend_from_slice(y);
        }
        let mut set = Self::new(nb_sample, lon, lat)?;
        set.nb_obs = contours.len();
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.nb_obs
    }

    pub fn is_empty(&self) -> bool {
        self.nb_obs == 0
    }

    pub fn nb_sample(&self) -> usize {
        self.nb_sample
    }

    /// (longitudes, latitudes) of observation `i`
    pub fn contour(&self, i: usize) -> (&[f64], &[f64]) {
        let range = i * self.nb_sample..(i + 1) * self.nb_sample;
        (&self.lon[range.clone()], &self.lat[range])
    }
}

/// Loads the contour geometry of one step
pub trait ContourSource {
    fn load(&mut self, path: &Path) -> Result<ContourSet>;
}

/// Reads contour variables from dataset files, masked and scaled
#[derive(Debug, Clone, Copy, Default)]
pub struct DatasetContours {
    kind: ContourKind,
}

impl DatasetContours {
    pub fn new(kind: ContourKind) -> Self {
        DatasetContours { kind }
    }
}

impl ContourSource for DatasetContours {
    fn load(&mut self, path: &Path) -> Result<ContourSet> {
        let (lon_name, lat_name) = self.kind.variable_names();
        let mut ds = Dataset::open(path)?;

        let var = ds
            .schema()
            .var(lon_name)
            .with_context(|| format!("{}: missing contour variable {lon_name}", path.display()))?;
        let nb_sample = match var.dims.get(1) {
            Some(dim) => ds.schema().dim_len(dim).unwrap_or(0),
            None => 1,
        };

        let lon = ds.read_f64(lon_name)?;
        let lat = ds.read_f64(lat_name)?;
        if nb_sample == 0 {
            // Contours without samples cannot overlap anything; keep the observation count.
            return Ok(ContourSet {
                nb_obs: ds.obs_len(),
                nb_sample: 0,
                lon,
                lat,
            });
        }
        ContourSet::new(nb_sample, lon, lat)
            .with_context(|| format!("{}: malformed contour arrays", path.display()))
    }
}
