//! Link factories binding the resilient resource holder to the transport.

use crate::error::BusError;
use crate::message::EntityPath;
use crate::resource::LinkFactory;
use crate::transport::{LinkHandle, ReceiveLinkSettings, Transport};
use async_trait::async_trait;
use chrono::Duration;
use std::sync::Arc;

/// Factory for send links
pub(crate) struct SendLinkFactory {
    pub transport: Arc<dyn Transport>,
    pub entity: EntityPath,
}

#[async_trait]
impl LinkFactory for SendLinkFactory {
    type Link = LinkHandle;

    async fn create(&self, timeout: Duration) -> Result<LinkHandle, BusError> {
        self.transport.open_send_link(&self.entity, timeout).await
    }

    async fn close(&self, link: &LinkHandle) {
        self.transport.close_link(link).await;
    }
}

/// Factory for receive links
pub(crate) struct ReceiveLinkFactory {
    pub transport: Arc<dyn Transport>,
    pub entity: EntityPath,
    pub settings: ReceiveLinkSettings,
}

#[async_trait]
impl LinkFactory for ReceiveLinkFactory {
    type Link = LinkHandle;

    async fn create(&self, timeout: Duration) -> Result<LinkHandle, BusError> {
        self.transport
            .open_receive_link(&self.entity, &self.settings, timeout)
            .await
    }

    async fn close(&self, link: &LinkHandle) {
        self.transport.close_link(link).await;
    }
}

/// Factory for request/response management links
pub(crate) struct ManagementLinkFactory {
    pub transport: Arc<dyn Transport>,
    pub entity: EntityPath,
}

#[async_trait]
impl LinkFactory for ManagementLinkFactory {
    type Link = LinkHandle;

    async fn create(&self, timeout: Duration) -> Result<LinkHandle, BusError> {
        self.transport
            .open_management_link(&self.entity, timeout)
            .await
    }

    async fn close(&self, link: &LinkHandle) {
        self.transport.close_link(link).await;
    }
}
