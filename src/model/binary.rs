use std::fs::File;
use std::path::Path;
use memmap2::Mmap;
use tracing::debug;
use crate::engine::{Arena, ArenaPlan};
use crate::error::{MlError, Result};
use crate::format::{read_header, ModelHeader};

/// A serialized model, borrowed, owned or memory mapped.
#[derive(Debug)]
pub enum ModelBinary<'a> {
    Borrowed(&'a [u8]),
    Owned(Vec<u8>),
    Mapped(Mmap),
}

impl<'a> ModelBinary<'a> {
    pub fn from_slice(data: &'a [u8]) -> Self {
        ModelBinary::Borrowed(data)
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ModelBinary::Borrowed(data) => data,
            ModelBinary::Owned(data) => data.as_slice(),
            ModelBinary::Mapped(map) => &map[..],
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    /// Read the fixed header, e.g. to pick the element type before `init`.
    pub fn header(&self) -> Result<ModelHeader> {
        read_header(self.as_bytes())
    }
}

impl ModelBinary<'static> {
    pub fn from_vec(data: Vec<u8>) -> Self {
        ModelBinary::Owned(data)
    }

    /// Memory-map a model file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        // SAFETY: the map is read-only and model files are not modified while loaded
        let map = unsafe { Mmap::map(&file)? };
        debug!("Mapped {} ({} bytes)", path.as_ref().display(), map.len());
        Ok(ModelBinary::Mapped(map))
    }
}

/// Arenas a caller lends to a model.
///
/// Either arena may be left out, in which case the model allocates its own.
/// `Model::deinit` hands caller arenas back.
#[derive(Debug, Default)]
pub struct ModelBuffer {
    pub persistent: Option<Arena>,
    pub scratch: Option<Arena>,
}

impl ModelBuffer {
    /// Allocate both arenas with the given word capacities.
    pub fn with_capacity(persistent_words: usize, scratch_words: usize) -> Result<Self> {
        Ok(Self {
            persistent: Some(Arena::with_capacity(persistent_words)?),
            scratch: Some(Arena::with_capacity(scratch_words)?),
        })
    }

    /// Allocate arenas sized exactly for a plan.
    pub fn for_plan(plan: &ArenaPlan) -> Result<Self> {
        Self::with_capacity(plan.persistent_words, plan.scratch_words)
    }

    pub fn is_empty(&self) -> bool {
        self.persistent.is_none() && self.scratch.is_none()
    }
}

/// Take the caller arena if present, else allocate one of `words`.
pub(crate) fn adopt_or_allocate(arena: Option<Arena>, words: usize) -> Result<(Arena, bool)> {
    match arena {
        Some(arena) => Ok((arena, true)),
        None => Arena::with_capacity(words).map(|arena| (arena, false)),
    }
}

pub(crate) fn empty_binary() -> MlError {
    MlError::InvalidArgument("model binary is empty".into())
}
