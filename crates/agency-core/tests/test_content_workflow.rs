use agency_core::store::{ChangeSet, InMemoryStore, WorkflowStore};
use agency_core::{
    AgencyError, ContentStage, EventBus, EventSink, EventType, PostDraft, ReviewDecision, WorkflowEngine, WorkflowEvent,
};
use agency_types::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Sink whose endpoint is down; counts the attempts
#[derive(Default)]
struct OfflineSink {
    attempts: AtomicUsize,
}

impl EventSink for OfflineSink {
    fn publish(&self, _event: &WorkflowEvent) -> agency_core::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(AgencyError::Persistence("notification endpoint offline".to_string()))
    }
}

struct Fixture {
    engine: WorkflowEngine,
    bus: Arc<EventBus>,
    client: User,
    manager: User,
    agency_admin: User,
    campaign: Campaign,
}

fn fixture() -> Fixture {
    let store = Arc::new(InMemoryStore::new());
    let bus = Arc::new(EventBus::new());

    let client = User::new("고객사", "client@brand.kr", Role::Client, Some("Acme"));
    let manager = User::new("김직원", "staff@acme.kr", Role::Employee, Some("Acme"));
    let agency_admin = User::new("이관리", "admin@acme.kr", Role::AgencyAdmin, Some("Acme"));
    let campaign = Campaign::new("봄 캠페인", client.id.clone(), manager.id.clone(), Some("Acme"));

    store
        .commit(
            ChangeSet::new()
                .user(client.clone())
                .user(manager.clone())
                .user(agency_admin.clone())
                .campaign(campaign.clone()),
        )
        .unwrap();

    Fixture {
        engine: WorkflowEngine::new(store, bus.clone()),
        bus,
        client,
        manager,
        agency_admin,
        campaign,
    }
}

fn draft(title: &str) -> PostDraft {
    PostDraft {
        work_type: "블로그".to_string(),
        title: title.to_string(),
        ..Default::default()
    }
}

#[test]
fn test_client_approves_pending_topic() {
    let fx = fixture();
    let post = fx.engine.create_post(&fx.campaign.id, draft("신제품 후기"), &fx.manager).unwrap();
    assert_eq!(post.topic_status, ReviewStatus::Pending);

    let decided = fx
        .engine
        .approve_content(&post.id, ContentStage::Topic, ReviewDecision::Approved, &fx.client)
        .unwrap();

    assert_eq!(decided.topic_status, ReviewStatus::Approved);
    let stored = fx.engine.store().get_post(&post.id).unwrap().unwrap();
    assert_eq!(stored.topic_status, ReviewStatus::Approved);
}

#[test]
fn test_agency_admin_cannot_approve_topic() {
    let fx = fixture();
    let post = fx.engine.create_post(&fx.campaign.id, draft("신제품 후기"), &fx.manager).unwrap();

    let result = fx
        .engine
        .approve_content(&post.id, ContentStage::Topic, ReviewDecision::Approved, &fx.agency_admin);

    assert!(matches!(result, Err(AgencyError::PermissionDenied(_))));
    let stored = fx.engine.store().get_post(&post.id).unwrap().unwrap();
    assert_eq!(stored.topic_status, ReviewStatus::Pending);
}

#[test]
fn test_only_the_campaigns_own_client_may_review() {
    let fx = fixture();
    let post = fx.engine.create_post(&fx.campaign.id, draft("주제"), &fx.manager).unwrap();
    let other_client = User::new("다른 고객", "other@brand.kr", Role::Client, Some("Acme"));

    for actor in [&other_client, &fx.manager, &fx.agency_admin] {
        let result = fx
            .engine
            .approve_content(&post.id, ContentStage::Topic, ReviewDecision::Rejected, actor);
        assert!(matches!(result, Err(AgencyError::PermissionDenied(_))));
    }

    let stored = fx.engine.store().get_post(&post.id).unwrap().unwrap();
    assert_eq!(stored.topic_status, ReviewStatus::Pending);
}

#[test]
fn test_register_outline_requires_approved_topic() {
    let fx = fixture();
    let post = fx.engine.create_post(&fx.campaign.id, draft("주제"), &fx.manager).unwrap();

    let result = fx
        .engine
        .register_outline(&post.id, "1. 도입\n2. 본문", Vec::new(), &fx.manager);

    assert!(matches!(result, Err(AgencyError::PreconditionFailed(_))));
    let stored = fx.engine.store().get_post(&post.id).unwrap().unwrap();
    assert!(stored.outline.is_none());
    assert!(stored.outline_status.is_none());
}

#[test]
fn test_full_content_cycle() {
    let fx = fixture();
    let events = fx.bus.subscribe();

    let post = fx.engine.create_post(&fx.campaign.id, draft("주제"), &fx.manager).unwrap();
    fx.engine
        .approve_content(&post.id, ContentStage::Topic, ReviewDecision::Approved, &fx.client)
        .unwrap();

    let with_outline = fx
        .engine
        .register_outline(&post.id, "1. 도입", vec![PostImage::new("https://cdn.acme.kr/1.png")], &fx.manager)
        .unwrap();
    assert_eq!(with_outline.outline_status, Some(ReviewStatus::Pending));

    // a second registration is refused; edits go through edit_outline
    let again = fx.engine.register_outline(&post.id, "다른 목차", Vec::new(), &fx.manager);
    assert!(matches!(again, Err(AgencyError::PreconditionFailed(_))));

    fx.engine
        .approve_content(&post.id, ContentStage::Outline, ReviewDecision::Rejected, &fx.client)
        .unwrap();
    let edited = fx.engine.edit_outline(&post.id, "1. 도입\n2. 사례", None, &fx.manager).unwrap();
    assert_eq!(edited.outline_status, Some(ReviewStatus::Pending));
    assert_eq!(edited.images.len(), 1);

    fx.engine
        .approve_content(&post.id, ContentStage::Outline, ReviewDecision::Approved, &fx.client)
        .unwrap();
    let published = fx
        .engine
        .request_link(&post.id, "https://blog.acme.kr/posts/1", &fx.manager)
        .unwrap();
    assert_eq!(published.published_url.as_deref(), Some("https://blog.acme.kr/posts/1"));

    let types: Vec<EventType> = events.try_iter().map(|e| e.event_type).collect();
    assert_eq!(
        types,
        vec![
            EventType::PostCreated,
            EventType::TopicDecided,
            EventType::OutlineRegistered,
            EventType::OutlineDecided,
            EventType::OutlineResubmitted,
            EventType::OutlineDecided,
            EventType::LinkRegistered,
        ]
    );
}

#[test]
fn test_edit_topic_resets_review_and_outline() {
    let fx = fixture();
    let post = fx.engine.create_post(&fx.campaign.id, draft("주제"), &fx.manager).unwrap();
    fx.engine
        .approve_content(&post.id, ContentStage::Topic, ReviewDecision::Approved, &fx.client)
        .unwrap();
    fx.engine.register_outline(&post.id, "목차", Vec::new(), &fx.manager).unwrap();

    let edited = fx.engine.edit_topic(&post.id, "새 주제", &fx.manager).unwrap();

    assert_eq!(edited.topic_status, ReviewStatus::Pending);
    assert!(edited.outline.is_none());
    assert!(edited.outline_status.is_none());
}

#[test]
fn test_link_registration_ignores_review_state() {
    let fx = fixture();
    let post = fx.engine.create_post(&fx.campaign.id, draft("주제"), &fx.manager).unwrap();

    let published = fx.engine.request_link(&post.id, "https://blog.acme.kr/2", &fx.manager).unwrap();
    assert_eq!(published.topic_status, ReviewStatus::Pending);
    assert!(published.published_url.is_some());
}

#[test]
fn test_selection_actions_need_exactly_one_post() {
    let fx = fixture();
    let a = fx.engine.create_post(&fx.campaign.id, draft("a"), &fx.manager).unwrap();
    let b = fx.engine.create_post(&fx.campaign.id, draft("b"), &fx.manager).unwrap();

    let result = fx
        .engine
        .request_link_for_selection(&[a.id.clone(), b.id.clone()], "https://x.kr", &fx.manager);
    assert!(matches!(result, Err(AgencyError::PreconditionFailed(_))));

    let result = fx.engine.request_link_for_selection(&[a.id.clone()], "https://x.kr", &fx.manager);
    assert!(result.is_ok());
}

#[test]
fn test_unknown_post_is_not_found() {
    let fx = fixture();
    let result = fx
        .engine
        .approve_content(&PostId::new(), ContentStage::Topic, ReviewDecision::Approved, &fx.client);
    assert!(matches!(result, Err(AgencyError::NotFound(_))));
}

#[test]
fn test_client_cannot_create_posts() {
    let fx = fixture();
    let result = fx.engine.create_post(&fx.campaign.id, draft("주제"), &fx.client);
    assert!(matches!(result, Err(AgencyError::PermissionDenied(_))));
}

#[test]
fn test_blank_outline_is_a_validation_error_before_topic_approval() {
    let fx = fixture();
    let post = fx.engine.create_post(&fx.campaign.id, draft("주제"), &fx.manager).unwrap();

    let result = fx.engine.register_outline(&post.id, "   ", Vec::new(), &fx.manager);
    assert!(matches!(result, Err(AgencyError::Validation(_))));

    let result = fx.engine.edit_outline(&post.id, "", None, &fx.manager);
    assert!(matches!(result, Err(AgencyError::Validation(_))));
}

#[test]
fn test_notification_failure_keeps_the_transition() {
    let fx = fixture();
    let sink = Arc::new(OfflineSink::default());
    let store = Arc::new(InMemoryStore::new());
    store.import(fx.engine.store().snapshot().unwrap()).unwrap();
    let engine = WorkflowEngine::new(store, sink.clone());

    let post = engine.create_post(&fx.campaign.id, draft("주제"), &fx.manager).unwrap();
    let decided = engine
        .approve_content(&post.id, ContentStage::Topic, ReviewDecision::Approved, &fx.client)
        .unwrap();
    assert_eq!(decided.topic_status, ReviewStatus::Approved);

    let stored = engine.store().get_post(&post.id).unwrap().unwrap();
    assert_eq!(stored.topic_status, ReviewStatus::Approved);
    assert_eq!(sink.attempts.load(Ordering::SeqCst), 2);
}
