//! Extracting an FMU archive, parsing its model description and loading the
//! platform shared library.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::binding::{ApiFlags, Fmi2Api};
use crate::handle::HandleArena;
use crate::model::Model;
use crate::{Error, Result};

const MODEL_DESCRIPTION: &str = "modelDescription.xml";

/// The `binaries/` subdirectory name for the running platform, or `None`
/// on platforms the FMI 2.0 layout does not define.
pub fn platform_binary_dir(os: &str, pointer_width_bits: usize) -> Option<&'static str> {
    match (os, pointer_width_bits) {
        ("linux", 64) => Some("linux64"),
        ("linux", 32) => Some("linux32"),
        ("windows", 64) => Some("win64"),
        ("windows", 32) => Some("win32"),
        ("macos", 64) => Some("darwin64"),
        _ => None,
    }
}

fn host_binary_dir() -> Result<&'static str> {
    platform_binary_dir(std::env::consts::OS, std::mem::size_of::<usize>() * 8).ok_or_else(|| {
        Error::BinaryMissing {
            path: PathBuf::from(format!("binaries/<{}>", std::env::consts::OS)),
        }
    })
}

/// A loaded FMU: the extracted archive, its parsed and indexed model
/// description, the resolved shared-library API, and the arena of live
/// native instances.
///
/// Instances borrow the `Fmu`, so the library cannot be unloaded while any
/// of them is alive.
#[derive(Debug)]
pub struct Fmu {
    dir: PathBuf,
    /// Keeps a temp extraction alive for the lifetime of the import.
    _extraction: Option<tempfile::TempDir>,
    model: Model,
    api: Fmi2Api,
    handles: HandleArena,
    /// Names of live instances, guarded together with native instantiation
    /// so concurrent creates cannot race the duplicate check.
    instances: Mutex<Vec<String>>,
}

impl Fmu {
    /// Load from a `.fmu` archive or from an already extracted directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.is_dir() {
            Self::from_dir(path.to_path_buf(), None)
        } else {
            let file = std::fs::File::open(path)?;
            let mut archive = zip::ZipArchive::new(file)?;
            let temp = tempfile::Builder::new().prefix("fmu-bind").tempdir()?;
            log::trace!("Extracting {} into {:?}", path.display(), temp.path());
            archive.extract(&temp)?;
            Self::from_dir(temp.path().to_path_buf(), Some(temp))
        }
    }

    fn from_dir(dir: PathBuf, extraction: Option<tempfile::TempDir>) -> Result<Self> {
        // The directory may have been given relative to the working
        // directory; the resource URL handed to fmi2Instantiate must be
        // built from an absolute path.
        let dir = dir.canonicalize()?;
        let md = fmu_schema::from_path(&dir.join(MODEL_DESCRIPTION))?;
        if md.fmi_version.trim() != "2.0" {
            return Err(Error::UnsupportedFmiVersion(md.fmi_version));
        }
        log::debug!(
            "Loaded model description for `{}` (GUID {})",
            md.model_name,
            md.guid
        );

        let flags = ApiFlags::from_model(&md);
        let model = Model::new(md);
        let lib_path = shared_lib_path(&dir, &model)?;
        if !lib_path.is_file() {
            return Err(Error::BinaryMissing { path: lib_path });
        }
        let api = Fmi2Api::load(&lib_path, flags)?;

        match api.version() {
            Ok(v) if v.trim() == "2.0" => {}
            Ok(v) => log::warn!("binary reports fmi2GetVersion `{v}`, expected `2.0`"),
            Err(e) => return Err(e),
        }

        Ok(Self {
            dir,
            _extraction: extraction,
            model,
            api,
            handles: HandleArena::new(),
            instances: Mutex::new(Vec::new()),
        })
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn api(&self) -> &Fmi2Api {
        &self.api
    }

    pub fn handles(&self) -> &HandleArena {
        &self.handles
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Whether directional derivatives can actually be evaluated: the XML
    /// capability flag and the exported symbol, together.
    pub fn supports_directional_derivative(&self) -> bool {
        self.api.get_directional_derivative.is_resolved()
    }

    /// Whether FMU state capture is usable end to end.
    pub fn supports_get_set_state(&self) -> bool {
        self.api.get_fmu_state.is_resolved() && self.api.set_fmu_state.is_resolved()
    }

    pub fn supports_serialize_state(&self) -> bool {
        self.api.serialize_fmu_state.is_resolved()
            && self.api.de_serialize_fmu_state.is_resolved()
    }

    /// `file://` URL of the extracted `resources/` directory, passed to
    /// `fmi2Instantiate`.
    pub fn resource_url(&self) -> url::Url {
        url::Url::from_directory_path(self.dir.join("resources"))
            .expect("extraction path is absolute")
    }

    pub fn instance_names(&self) -> Vec<String> {
        self.instances.lock().unwrap().clone()
    }

    /// Run `f` with the live-instance list held; native instantiation and
    /// the list update happen under this one lock.
    pub(crate) fn with_instances<R>(&self, f: impl FnOnce(&mut Vec<String>) -> R) -> R {
        f(&mut self.instances.lock().unwrap())
    }

    /// Create a Model Exchange instance.
    #[cfg(feature = "me")]
    pub fn instantiate_me(
        &self,
        name: &str,
        visible: bool,
        logging_on: bool,
    ) -> Result<crate::instance::InstanceME<'_>> {
        crate::instance::InstanceME::new(self, name, visible, logging_on)
    }

    /// Create a Co-Simulation instance.
    #[cfg(feature = "cs")]
    pub fn instantiate_cs(
        &self,
        name: &str,
        visible: bool,
        logging_on: bool,
    ) -> Result<crate::instance::InstanceCS<'_>> {
        crate::instance::InstanceCS::new(self, name, visible, logging_on)
    }

    /// Drop the shared library. Consumes the import, and the instance
    /// lifetimes guarantee every native instance was freed first.
    pub fn unload(mut self) {
        self.api.unload();
    }
}

/// The shared library path for this platform. When both interfaces are
/// declared with different identifiers the Model Exchange one wins.
fn shared_lib_path(dir: &Path, model: &Model) -> Result<PathBuf> {
    let md = model.description();
    let me_id = md.model_exchange.as_ref().map(|x| x.model_identifier.as_str());
    let cs_id = md.co_simulation.as_ref().map(|x| x.model_identifier.as_str());
    let identifier = match (me_id, cs_id) {
        (Some(me), Some(cs)) => {
            if me != cs {
                log::warn!(
                    "modelIdentifier differs between interfaces (`{me}` vs `{cs}`), using `{me}`"
                );
            }
            me
        }
        (Some(me), None) => me,
        (None, Some(cs)) => cs,
        (None, None) => model.name(),
    };
    let platform = host_binary_dir()?;
    Ok(dir
        .join("binaries")
        .join(platform)
        .join(format!("{identifier}{}", std::env::consts::DLL_SUFFIX)))
}
