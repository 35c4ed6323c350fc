//! Configuration layer trait
//!
//! A configuration is assembled from several layers of decreasing priority
//! (environment overrides, persisted settings, built-in defaults). Each layer
//! is the same partial type; layers are merged lowest to highest and the
//! result is validated once.

/// Trait for partial configuration layers that can be merged and validated
///
/// # Example
///
/// ```rust,ignore
/// use tooling::config::ConfigBuilder;
///
/// #[derive(Clone, Default)]
/// struct Layer {
///     port: Option<u16>,
/// }
///
/// impl ConfigBuilder for Layer {
///     type Error = String;
///
///     fn from_env(prefix: &str) -> Result<Self, String> {
///         Ok(Self::default())
///     }
///
///     fn merge(&mut self, higher: Self) -> &mut Self {
///         if higher.port.is_some() {
///             self.port = higher.port;
///         }
///         self
///     }
/// }
///
/// let effective = Layer::layered([defaults, persisted, env]);
/// ```
pub trait ConfigBuilder: Default + Clone {
    /// Error produced when a layer cannot be loaded or is invalid
    type Error;

    /// Validate the layer
    ///
    /// Should check values being within valid ranges and dependencies
    /// between fields.
    fn validate(&self) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Load a layer from environment variables named `{PREFIX}{FIELD_NAME}`
    fn from_env(prefix: &str) -> Result<Self, Self::Error>;

    /// Merge a higher-priority layer into this one
    ///
    /// Fields set in `higher` overwrite fields in `self`; fields left unset
    /// in `higher` keep the current value.
    fn merge(&mut self, higher: Self) -> &mut Self;

    /// Fold layers given lowest priority first
    fn layered<I>(layers: I) -> Self
    where
        I: IntoIterator<Item = Self>,
    {
        let mut acc = Self::default();
        for layer in layers {
            acc.merge(layer);
        }
        acc
    }

    /// Fold layers and validate the result
    fn build_layered<I>(layers: I) -> Result<Self, Self::Error>
    where
        I: IntoIterator<Item = Self>,
    {
        let config = Self::layered(layers);
        config.validate()?;
        Ok(config)
    }
}
