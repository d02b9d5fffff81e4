use async_trait::async_trait;

use super::{require, Step};
use crate::common::{Error, Result};
use crate::context::{Context, ContextValue};
use crate::loaders::{load_bytes, DataLoader};

/// Loads a payload and stores it in the context for later steps
pub struct LoadDataStep {
    name: String,
    run_concurrently: bool,
    key: String,
    data: Box<dyn DataLoader>,
    as_text: bool,
}

impl LoadDataStep {
    pub fn new(key: impl Into<String>, data: Box<dyn DataLoader>) -> Self {
        let key = key.into();
        Self {
            name: format!("load data into '{}'", key),
            run_concurrently: false,
            key,
            data,
            as_text: false,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn concurrently(mut self, run_concurrently: bool) -> Self {
        self.run_concurrently = run_concurrently;
        self
    }

    /// Store the payload as text instead of raw bytes
    pub fn as_text(mut self, as_text: bool) -> Self {
        self.as_text = as_text;
        self
    }
}

#[async_trait]
impl Step for LoadDataStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn run_concurrently(&self) -> bool {
        self.run_concurrently
    }

    fn validate(&self, ctx: &Context) -> Result<()> {
        require("load_data", "key", &self.key)?;
        self.data.validate(ctx)
    }

    async fn execute(&self, ctx: &Context) -> Result<()> {
        let payload = load_bytes(self.data.as_ref(), ctx).await?;
        let size = payload.len();
        let value = if self.as_text {
            let text = String::from_utf8(payload).map_err(|_| {
                Error::Load(format!("{} is not valid UTF-8", self.data.describe()))
            })?;
            ContextValue::Text(text)
        } else {
            ContextValue::Bytes(payload)
        };
        ctx.set(&self.key, value)?;
        ctx.log_info(format!(
            "Loaded {} bytes from {} into '{}'",
            size,
            self.data.describe(),
            self.key
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loaders::TextLoader;

    #[tokio::test]
    async fn test_stores_text_or_bytes() {
        let ctx = Context::new();
        LoadDataStep::new("raw", Box::new(TextLoader::new("abc")))
            .execute(&ctx)
            .await
            .unwrap();
        assert_eq!(ctx.get_bytes("raw").unwrap(), Some(b"abc".to_vec()));

        LoadDataStep::new("text", Box::new(TextLoader::new("abc")))
            .as_text(true)
            .execute(&ctx)
            .await
            .unwrap();
        assert_eq!(ctx.get_text("text").unwrap().as_deref(), Some("abc"));
    }
}
