//! Content approval state machine
//!
//! A post carries two parallel review sub-machines: the topic and, once the
//! topic is approved, the outline. Only the campaign's client decides either
//! one. Editing the topic invalidates the outline; editing the outline only
//! re-opens its own review.

use super::engine::WorkflowEngine;
use crate::error::{AgencyError, Result};
use crate::events::{EventType, WorkflowEvent};
use crate::permissions::{self, Permission};
use crate::store::ChangeSet;
use agency_types::*;
use chrono::{NaiveDate, Utc};

/// Which review sub-machine a decision applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentStage {
    Topic,
    Outline,
}

/// Client verdict on a pending review
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewDecision {
    Approved,
    Rejected,
}

impl From<ReviewDecision> for ReviewStatus {
    fn from(decision: ReviewDecision) -> Self {
        match decision {
            ReviewDecision::Approved => ReviewStatus::Approved,
            ReviewDecision::Rejected => ReviewStatus::Rejected,
        }
    }
}

/// Input for a new post
#[derive(Debug, Clone, Default)]
pub struct PostDraft {
    pub work_type: String,
    pub title: String,
    /// Create the topic already approved
    pub skip_approval: bool,
    pub product_id: Option<ProductId>,
    pub quantity: Option<u32>,
    pub start_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
}

/// Selection-driven actions work on exactly one row
pub fn is_actionable<T>(selection: &[T]) -> bool {
    selection.len() == 1
}

pub fn single_selection<T>(selection: &[T]) -> Result<&T> {
    match selection {
        [only] => Ok(only),
        [] => Err(AgencyError::PreconditionFailed("No item selected".to_string())),
        _ => Err(AgencyError::PreconditionFailed(format!(
            "Exactly one item must be selected, got {}",
            selection.len()
        ))),
    }
}

fn require_text(value: &str, what: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AgencyError::Validation(format!("{} must not be empty", what)));
    }
    Ok(trimmed.to_string())
}

pub fn new_post(campaign_id: CampaignId, draft: PostDraft) -> Result<Post> {
    let title = require_text(&draft.title, "Topic title")?;
    let work_type = require_text(&draft.work_type, "Work type")?;

    if draft.quantity == Some(0) {
        return Err(AgencyError::Validation("Quantity must be at least 1".to_string()));
    }

    let now = Utc::now();
    Ok(Post {
        id: PostId::new(),
        campaign_id,
        work_type,
        title,
        topic_status: if draft.skip_approval {
            ReviewStatus::Approved
        } else {
            ReviewStatus::Pending
        },
        outline: None,
        outline_status: None,
        images: Vec::new(),
        published_url: None,
        order_request_status: None,
        order_request_id: None,
        product_id: draft.product_id,
        quantity: draft.quantity,
        start_date: draft.start_date,
        due_date: draft.due_date,
        created_at: now,
        updated_at: now,
    })
}

/// Apply a client decision to a pending sub-machine
pub fn decide(post: &mut Post, stage: ContentStage, decision: ReviewDecision) -> Result<()> {
    match stage {
        ContentStage::Topic => {
            if post.topic_status != ReviewStatus::Pending {
                return Err(AgencyError::PreconditionFailed(format!(
                    "Topic of post {} is {}, not pending",
                    post.id,
                    post.topic_status.label()
                )));
            }
            post.topic_status = decision.into();
        }
        ContentStage::Outline => {
            if post.outline_status != Some(ReviewStatus::Pending) {
                return Err(AgencyError::PreconditionFailed(format!(
                    "Post {} has no pending outline",
                    post.id
                )));
            }
            post.outline_status = Some(decision.into());
        }
    }

    post.updated_at = Utc::now();
    Ok(())
}

pub fn can_register_outline(post: &Post) -> bool {
    post.topic_status == ReviewStatus::Approved && post.outline.is_none()
}

pub fn register_outline(post: &mut Post, content: &str, images: Vec<PostImage>) -> Result<()> {
    let outline = require_text(content, "Outline")?;
    if !can_register_outline(post) {
        return Err(AgencyError::PreconditionFailed(format!(
            "Outline of post {} can only be registered once after topic approval",
            post.id
        )));
    }

    post.outline = Some(outline);
    post.outline_status = Some(ReviewStatus::Pending);
    post.images = images;
    post.updated_at = Utc::now();
    Ok(())
}

/// Re-request ("재요청") with a new title; the outline no longer applies
pub fn edit_topic(post: &mut Post, title: &str) -> Result<()> {
    post.title = require_text(title, "Topic title")?;
    post.topic_status = ReviewStatus::Pending;
    post.outline = None;
    post.outline_status = None;
    post.images.clear();
    post.updated_at = Utc::now();
    Ok(())
}

pub fn edit_outline(post: &mut Post, content: &str, images: Option<Vec<PostImage>>) -> Result<()> {
    let outline = require_text(content, "Outline")?;
    if post.outline.is_none() {
        return Err(AgencyError::PreconditionFailed(format!(
            "Post {} has no outline to edit",
            post.id
        )));
    }

    post.outline = Some(outline);
    post.outline_status = Some(ReviewStatus::Pending);
    if let Some(images) = images {
        post.images = images;
    }
    post.updated_at = Utc::now();
    Ok(())
}

/// Publishing is not gated on review state
pub fn register_link(post: &mut Post, url: &str) -> Result<()> {
    post.published_url = Some(require_text(url, "Published URL")?);
    post.updated_at = Utc::now();
    Ok(())
}

/// Attach a new order request; allowed first time or after a rejection
pub fn begin_order_request(post: &mut Post, request_id: PurchaseRequestId) -> Result<()> {
    if post.topic_status != ReviewStatus::Approved {
        return Err(AgencyError::PreconditionFailed(format!(
            "Post {} needs an approved topic before ordering",
            post.id
        )));
    }

    match post.order_request_status {
        None | Some(OrderRequestStatus::Rejected) => {}
        Some(status) => {
            return Err(AgencyError::PreconditionFailed(format!(
                "Post {} already has an order request ({})",
                post.id,
                status.label()
            )))
        }
    }

    post.order_request_status = Some(OrderRequestStatus::Pending);
    post.order_request_id = Some(request_id);
    post.updated_at = Utc::now();
    Ok(())
}

/// Mirror the decision on the post's pending order request
pub fn resolve_order_request(post: &mut Post, request_id: &PurchaseRequestId, approved: bool) -> Result<()> {
    if post.order_request_id.as_ref() != Some(request_id)
        || post.order_request_status != Some(OrderRequestStatus::Pending)
    {
        return Err(AgencyError::PreconditionFailed(format!(
            "Post {} has no pending order request {}",
            post.id, request_id
        )));
    }

    post.order_request_status = Some(if approved {
        OrderRequestStatus::Approved
    } else {
        OrderRequestStatus::Rejected
    });
    post.updated_at = Utc::now();
    Ok(())
}

impl WorkflowEngine {
    /// Posts are written by the campaign's manager or an admin scoped to it
    fn authorize_post_edit(&self, actor: &User, campaign: &Campaign, permission: Permission) -> Result<()> {
        if permissions::grants(actor, permission) && permissions::can_edit_campaign(actor, campaign) {
            return Ok(());
        }

        log::warn!("User {} may not edit posts of campaign {}", actor.id, campaign.id);
        Err(AgencyError::PermissionDenied(format!(
            "User {} may not edit posts of campaign {}",
            actor.id, campaign.id
        )))
    }

    pub fn create_post(&self, campaign_id: &CampaignId, draft: PostDraft, actor: &User) -> Result<Post> {
        let campaign = self.load_campaign(campaign_id)?;
        self.authorize_post_edit(actor, &campaign, Permission::PostCreate)?;

        if let Some(product_id) = &draft.product_id {
            self.load_product(product_id)?;
        }

        let post = new_post(campaign.id.clone(), draft)?;
        self.commit(ChangeSet::new().post(post.clone()))?;

        log::info!("Created post {} in campaign {}", post.id, campaign.id);

        if post.topic_status == ReviewStatus::Pending {
            self.emit(
                WorkflowEvent::new(
                    EventType::PostCreated,
                    "주제 승인 요청",
                    format!("'{}' 주제가 등록되어 승인을 기다립니다", post.title),
                )
                .related(&post.id)
                .related(&campaign.id)
                .notify(&[Role::Client]),
            );
        }

        Ok(post)
    }

    /// Client decision on a post's topic or outline
    pub fn approve_content(
        &self,
        post_id: &PostId,
        stage: ContentStage,
        decision: ReviewDecision,
        actor: &User,
    ) -> Result<Post> {
        let mut post = self.load_post(post_id)?;
        let campaign = self.load_campaign(&post.campaign_id)?;

        if !permissions::can_approve_post(actor, &post, &campaign) {
            log::warn!("User {} ({}) may not review post {}", actor.id, actor.role, post.id);
            return Err(AgencyError::PermissionDenied(format!(
                "Only the campaign's client may review post {}",
                post.id
            )));
        }

        decide(&mut post, stage, decision)?;
        self.commit(ChangeSet::new().post(post.clone()))?;

        log::info!("Post {} {:?} decided as {:?} by {}", post.id, stage, decision, actor.id);

        let (event_type, what) = match stage {
            ContentStage::Topic => (EventType::TopicDecided, "주제"),
            ContentStage::Outline => (EventType::OutlineDecided, "목차"),
        };
        let verdict = match decision {
            ReviewDecision::Approved => "승인",
            ReviewDecision::Rejected => "반려",
        };
        self.emit(
            WorkflowEvent::new(
                event_type,
                format!("{} {}", what, verdict),
                format!("'{}' {}가 {}되었습니다", post.title, what, verdict),
            )
            .related(&post.id)
            .related(&campaign.id)
            .notify(&[Role::Employee, Role::AgencyAdmin]),
        );

        Ok(post)
    }

    pub fn register_outline(
        &self,
        post_id: &PostId,
        content: &str,
        images: Vec<PostImage>,
        actor: &User,
    ) -> Result<Post> {
        let mut post = self.load_post(post_id)?;
        let campaign = self.load_campaign(&post.campaign_id)?;
        self.authorize_post_edit(actor, &campaign, Permission::PostRegisterOutline)?;

        register_outline(&mut post, content, images)?;
        self.commit(ChangeSet::new().post(post.clone()))?;

        log::info!("Registered outline for post {}", post.id);
        self.emit(
            WorkflowEvent::new(
                EventType::OutlineRegistered,
                "목차 승인 요청",
                format!("'{}' 목차가 등록되었습니다", post.title),
            )
            .related(&post.id)
            .notify(&[Role::Client]),
        );

        Ok(post)
    }

    pub fn register_outline_for_selection(
        &self,
        selection: &[PostId],
        content: &str,
        images: Vec<PostImage>,
        actor: &User,
    ) -> Result<Post> {
        let post_id = single_selection(selection)?;
        self.register_outline(post_id, content, images, actor)
    }

    /// Register the published URL of a post
    pub fn request_link(&self, post_id: &PostId, url: &str, actor: &User) -> Result<Post> {
        let mut post = self.load_post(post_id)?;
        let campaign = self.load_campaign(&post.campaign_id)?;
        self.authorize_post_edit(actor, &campaign, Permission::PostRegisterLink)?;

        register_link(&mut post, url)?;
        self.commit(ChangeSet::new().post(post.clone()))?;

        log::info!("Registered link for post {}", post.id);
        self.emit(
            WorkflowEvent::new(
                EventType::LinkRegistered,
                "게시 링크 등록",
                format!("'{}' 게시물이 발행되었습니다", post.title),
            )
            .related(&post.id)
            .notify(&[Role::Client]),
        );

        Ok(post)
    }

    pub fn request_link_for_selection(&self, selection: &[PostId], url: &str, actor: &User) -> Result<Post> {
        let post_id = single_selection(selection)?;
        self.request_link(post_id, url, actor)
    }

    pub fn edit_topic(&self, post_id: &PostId, title: &str, actor: &User) -> Result<Post> {
        let mut post = self.load_post(post_id)?;
        let campaign = self.load_campaign(&post.campaign_id)?;
        self.authorize_post_edit(actor, &campaign, Permission::PostCreate)?;

        edit_topic(&mut post, title)?;
        self.commit(ChangeSet::new().post(post.clone()))?;

        log::info!("Topic of post {} re-requested", post.id);
        self.emit(
            WorkflowEvent::new(
                EventType::TopicResubmitted,
                "주제 재요청",
                format!("'{}' 주제가 수정되어 다시 승인을 기다립니다", post.title),
            )
            .related(&post.id)
            .notify(&[Role::Client]),
        );

        Ok(post)
    }

    pub fn edit_outline(
        &self,
        post_id: &PostId,
        content: &str,
        images: Option<Vec<PostImage>>,
        actor: &User,
    ) -> Result<Post> {
        let mut post = self.load_post(post_id)?;
        let campaign = self.load_campaign(&post.campaign_id)?;
        self.authorize_post_edit(actor, &campaign, Permission::PostRegisterOutline)?;

        edit_outline(&mut post, content, images)?;
        self.commit(ChangeSet::new().post(post.clone()))?;

        log::info!("Outline of post {} re-requested", post.id);
        self.emit(
            WorkflowEvent::new(
                EventType::OutlineResubmitted,
                "목차 재요청",
                format!("'{}' 목차가 수정되었습니다", post.title),
            )
            .related(&post.id)
            .notify(&[Role::Client]),
        );

        Ok(post)
    }

    /// Posts of a campaign the actor can see
    pub fn visible_posts(&self, campaign_id: &CampaignId, actor: &User) -> Result<Vec<Post>> {
        let campaign = self.load_campaign(campaign_id)?;
        if !permissions::can_view_campaign(actor, &campaign) {
            return Err(AgencyError::PermissionDenied(format!(
                "User {} may not view campaign {}",
                actor.id, campaign.id
            )));
        }
        self.store().list_posts(campaign_id)
    }
}
