use crate::ml::error::{PredictionError, PredictionResult};
use crate::ml::estimator::{
    commit_artifact, read_artifact, stage_artifact, ForestModel, SupervisedModel,
};
use crate::ml::features::{CategoryEncoder, FeatureContext, FeaturePreparer};
use crate::ml::models::Metric;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use strum::IntoEnumIterator;
use tracing::{debug, warn};

/// File holding the category encoder shared by all four models
pub const ENCODER_FILE: &str = "label_encoders.bin";

/// In-memory state of one metric's model
pub enum ArtifactState {
    /// Nothing in memory; the artifact (if any) is read on first use
    Unloaded,
    Loaded(Box<dyn SupervisedModel>),
}

impl ArtifactState {
    pub fn is_loaded(&self) -> bool {
        matches!(self, ArtifactState::Loaded(_))
    }
}

/// Per-process models and encoder, backed by an artifact directory
pub struct ModelStore {
    directory: PathBuf,
    slots: BTreeMap<Metric, ArtifactState>,
    preparer: FeaturePreparer,
}

impl ModelStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            slots: Metric::iter().map(|m| (m, ArtifactState::Unloaded)).collect(),
            preparer: FeaturePreparer::new(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn model_path(&self, metric: Metric) -> PathBuf {
        self.directory.join(metric.artifact_file())
    }

    pub fn encoder_path(&self) -> PathBuf {
        self.directory.join(ENCODER_FILE)
    }

    pub fn is_loaded(&self, metric: Metric) -> bool {
        self.slots.get(&metric).map_or(false, ArtifactState::is_loaded)
    }

    /// Every metric either has a model in memory or an artifact on disk
    pub fn is_trained(&self) -> bool {
        Metric::iter().all(|m| self.is_loaded(m) || self.model_path(m).exists())
    }

    pub fn preparer(&self) -> &FeaturePreparer {
        &self.preparer
    }

    /// Load the metric's artifact (and the encoder, if not yet fitted) when
    /// nothing is in memory. A failed load leaves the slot unloaded.
    pub fn ensure_loaded(&mut self, metric: Metric) -> PredictionResult<()> {
        if self.is_loaded(metric) {
            return Ok(());
        }

        let path = self.model_path(metric);
        let model = ForestModel::restore(&path).map_err(|e| {
            if !matches!(e, PredictionError::ArtifactMissing(_)) {
                warn!(metric = %metric, error = %e, "Failed to load model artifact");
            }
            e
        })?;

        if !self.preparer.encoder().is_fitted() {
            self.load_encoder();
        }

        debug!(metric = %metric, path = %path.display(), "Loaded model artifact");
        self.slots.insert(metric, ArtifactState::Loaded(Box::new(model)));
        Ok(())
    }

    fn load_encoder(&mut self) {
        let path = self.encoder_path();
        let decoded = read_artifact(&path)
            .and_then(|bytes| Ok(bincode::deserialize::<CategoryEncoder>(&bytes)?));

        match decoded {
            Ok(encoder) => self.preparer = FeaturePreparer::with_encoder(encoder),
            Err(PredictionError::ArtifactMissing(_)) => {
                debug!(path = %path.display(), "No persisted category encoder")
            }
            Err(e) => warn!(error = %e, "Failed to load category encoder"),
        }
    }

    /// Raw-to-served prediction for one context; requires the slot to be loaded
    pub fn predict(&self, metric: Metric, context: &FeatureContext) -> PredictionResult<f64> {
        let model = match self.slots.get(&metric) {
            Some(ArtifactState::Loaded(model)) => model,
            _ => return Err(PredictionError::ModelNotTrained(metric.to_string())),
        };

        let features = self.preparer.transform_one(context, metric)?;
        let raw = model
            .predict(&features)?
            .first()
            .copied()
            .ok_or_else(|| PredictionError::Estimator("empty prediction".to_string()))?;

        metric.postprocess(raw)
    }

    /// Write the encoder and every model to the artifact directory.
    ///
    /// Every artifact is staged before any is moved into place, so a failed
    /// write leaves the previous encoder and models together on disk.
    pub fn persist(&self, preparer: &FeaturePreparer, models: &[ForestModel]) -> PredictionResult<()> {
        std::fs::create_dir_all(&self.directory)?;

        let mut staged = Vec::with_capacity(models.len() + 1);
        if let Err(e) = self.stage_all(preparer, models, &mut staged) {
            for (tmp, _) in &staged {
                if let Err(cleanup) = std::fs::remove_file(tmp) {
                    debug!(path = %tmp.display(), error = %cleanup, "Failed to remove staged artifact");
                }
            }
            return Err(e);
        }

        for (tmp, path) in &staged {
            commit_artifact(tmp, path)?;
        }
        Ok(())
    }

    fn stage_all(
        &self,
        preparer: &FeaturePreparer,
        models: &[ForestModel],
        staged: &mut Vec<(PathBuf, PathBuf)>,
    ) -> PredictionResult<()> {
        let encoder_path = self.encoder_path();
        let bytes = bincode::serialize(preparer.encoder())?;
        staged.push((stage_artifact(&encoder_path, &bytes)?, encoder_path));

        for model in models {
            let path = self.model_path(model.metric());
            staged.push((stage_artifact(&path, &model.to_bytes()?)?, path));
        }
        Ok(())
    }

    /// Replace all in-memory state with freshly trained models
    pub fn install(&mut self, preparer: FeaturePreparer, models: Vec<ForestModel>) {
        self.preparer = preparer;
        for model in models {
            self.slots
                .insert(model.metric(), ArtifactState::Loaded(Box::new(model)));
        }
    }
}
