//! Replay actions on a live page
//!
//! [`CdpTarget`] implements [`ReplayTarget`] on top of a chromiumoxide page:
//! navigation, locator-based clicks, key input and the caption overlay.

use crate::browser::overlay::OverlayScript;
use crate::error::{ConnectionError, Error, LocatorError, Result};
use crate::replay::ReplayTarget;
use chromiumoxide::cdp::browser_protocol::dom::EnableParams as DomEnableParams;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, InsertTextParams,
};
use chromiumoxide::cdp::browser_protocol::page::EnableParams as PageEnableParams;
use chromiumoxide::Page;
use tracing::{debug, info, instrument};

/// A page prepared for replay
pub struct CdpTarget {
    page: Page,
}

impl CdpTarget {
    /// Enable the Page and DOM domains on `page` and wrap it
    #[instrument(skip(page))]
    pub async fn attach(page: Page) -> Result<Self> {
        page.execute(PageEnableParams::default())
            .await
            .map_err(|e| ConnectionError::SubscriptionFailed(format!("Page.enable: {}", e)))?;
        page.execute(DomEnableParams::default())
            .await
            .map_err(|e| ConnectionError::SubscriptionFailed(format!("DOM.enable: {}", e)))?;

        debug!("Page and DOM domains enabled");
        Ok(Self { page })
    }

    async fn key_event(&self, kind: DispatchKeyEventType, text: Option<&str>) -> Result<()> {
        let mut builder = DispatchKeyEventParams::builder()
            .r#type(kind)
            .key("Enter")
            .code("Enter")
            .windows_virtual_key_code(13)
            .native_virtual_key_code(13);
        if let Some(text) = text {
            builder = builder.text(text);
        }
        let params = builder
            .build()
            .map_err(|e| Error::cdp(format!("Failed to build key event: {}", e)))?;

        self.page.execute(params).await?;
        Ok(())
    }
}

impl ReplayTarget for CdpTarget {
    #[instrument(skip(self))]
    async fn navigate(&self, url: &str) -> Result<()> {
        info!("Navigating to: {}", url);
        self.page
            .goto(url)
            .await
            .map_err(|e| Error::cdp(format!("Navigation to {} failed: {}", url, e)))?;
        Ok(())
    }

    async fn click_css(&self, selector: &str) -> Result<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|e| LocatorError::NotFound(format!("{} ({})", selector, e)))?;
        element
            .click()
            .await
            .map_err(|e| LocatorError::NotFound(format!("{} not clickable ({})", selector, e)))?;
        debug!("Clicked {}", selector);
        Ok(())
    }

    async fn click_xpath(&self, xpath: &str) -> Result<()> {
        let element = self
            .page
            .find_xpath(xpath)
            .await
            .map_err(|e| LocatorError::NotFound(format!("{} ({})", xpath, e)))?;
        element
            .click()
            .await
            .map_err(|e| LocatorError::NotFound(format!("{} not clickable ({})", xpath, e)))?;
        debug!("Clicked {}", xpath);
        Ok(())
    }

    async fn press_enter(&self) -> Result<()> {
        self.key_event(DispatchKeyEventType::KeyDown, Some("\r")).await?;
        self.key_event(DispatchKeyEventType::KeyUp, None).await
    }

    async fn insert_text(&self, text: &str) -> Result<()> {
        self.page.execute(InsertTextParams::new(text)).await?;
        Ok(())
    }

    async fn show_caption(&self, text: &str) -> Result<()> {
        let script = OverlayScript::show(text);
        self.page.evaluate(script.as_str()).await?;
        Ok(())
    }

    async fn remove_caption(&self) -> Result<()> {
        let script = OverlayScript::remove();
        self.page.evaluate(script.as_str()).await?;
        Ok(())
    }
}
