mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Duration;
use common::{FakeRemote, FlakyDeleteStore, entry, payload};
use exam_core::lifecycle::PartState;
use exam_core::model::{
    Answer, ExamChain, ExamId, ExamKey, ExamSessionRecord, QuestionId, QuizId, ScheduleId,
    TopicId,
};
use exam_core::time::{fixed_clock, fixed_now};
use exam_services::{
    Clock, CourseLink, ExamServices, ExamSession, RemoteConfig, RuntimeConfig, RuntimeError,
    SessionOptions,
};
use exam_storage::{InMemorySessionStore, SessionStore};

const SCHEDULE: u64 = 7;

fn options(explicit: Option<&str>, course: Option<CourseLink>) -> SessionOptions {
    SessionOptions {
        explicit_part: explicit.map(ExamKey::new),
        schedule_id: Some(ScheduleId::new(SCHEDULE)),
        course,
        checkpoint_every_secs: 0,
    }
}

fn services(clock: &Clock, store: &InMemorySessionStore, remote: &FakeRemote) -> ExamServices {
    ExamServices::from_parts(
        RuntimeConfig::new(RemoteConfig::new("http://exam.test/api/")),
        clock.clone(),
        Arc::new(store.clone()),
        Arc::new(remote.clone()),
    )
}

fn counter() -> (Arc<AtomicUsize>, Box<dyn FnOnce() + Send>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let handle = Arc::clone(&calls);
    (
        calls,
        Box::new(move || {
            handle.fetch_add(1, Ordering::SeqCst);
        }),
    )
}

async fn start(session: &mut ExamSession) {
    session.tick().await.unwrap();
    session.tick().await.unwrap();
    assert_eq!(session.runtime().state(), &PartState::InProgress);
}

#[tokio::test]
async fn resumes_at_latest_part_with_local_data() {
    let clock = fixed_clock();
    let store = InMemorySessionStore::new();
    store
        .put(&ExamKey::new("b"), &ExamSessionRecord::new(fixed_now()))
        .await
        .unwrap();
    let chain = ExamChain::new(vec![entry("a", 1), entry("b", 2), entry("c", 3)]).unwrap();
    let (_, back) = counter();

    let session = services(&clock, &store, &FakeRemote::default())
        .start_session(chain, options(None, None), back)
        .await
        .unwrap();

    assert_eq!(session.current_key(), &ExamKey::new("b"));
    assert_eq!(session.runtime().state(), &PartState::Initializing);
}

#[tokio::test]
async fn fresh_chain_starts_at_first_part_and_explicit_part_must_exist() {
    let clock = fixed_clock();
    let store = InMemorySessionStore::new();
    let services = services(&clock, &store, &FakeRemote::default());
    let parts = vec![entry("a", 1), entry("b", 2)];

    let (_, back) = counter();
    let session = services
        .start_session(ExamChain::new(parts.clone()).unwrap(), options(None, None), back)
        .await
        .unwrap();
    assert_eq!(session.current_key(), &ExamKey::new("a"));

    let (_, back) = counter();
    let result = services
        .start_session(
            ExamChain::new(parts).unwrap(),
            options(Some("zzz"), None),
            back,
        )
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn expiry_submits_part_and_moves_to_next_without_confirmation() {
    let clock = fixed_clock();
    let store = InMemorySessionStore::new();
    let remote = FakeRemote::default()
        .with_payload("a", payload(5, 10))
        .with_payload("b", payload(2, 10));
    let chain = ExamChain::new(vec![entry("a", 1), entry("b", 2)]).unwrap();
    let (returned, back) = counter();
    let mut session = services(&clock, &store, &remote)
        .start_session(chain, options(None, None), back)
        .await
        .unwrap();
    start(&mut session).await;

    let answer = |v: &str| Some(Answer::Choice(v.into()));
    session.record_answer(QuestionId::new(1), answer("a")).await.unwrap();
    clock.advance(Duration::seconds(2));
    session.next().await.unwrap();
    session.record_answer(QuestionId::new(2), answer("b")).await.unwrap();
    clock.advance(Duration::seconds(3));
    session.next().await.unwrap();
    session.record_answer(QuestionId::new(3), answer("c")).await.unwrap();
    clock.advance(Duration::seconds(1));
    session.go_to(3).await.unwrap();

    clock.advance(Duration::seconds(594));
    session.tick().await.unwrap();

    let submissions = remote.submissions();
    assert_eq!(submissions.len(), 1);
    let submitted = &submissions[0];
    assert_eq!(submitted.exam_id, ExamId::new(1));
    assert_eq!(submitted.answers.len(), 3);
    assert_eq!(submitted.question_elapsed_times[&QuestionId::new(1)], 2);
    assert_eq!(submitted.question_elapsed_times[&QuestionId::new(2)], 3);
    assert_eq!(submitted.question_elapsed_times[&QuestionId::new(3)], 1);
    assert_eq!(submitted.question_elapsed_times[&QuestionId::new(4)], 594);
    assert_eq!(submitted.question_elapsed_times.values().sum::<u64>(), 600);

    assert!(!store.exists(&ExamKey::new("a")).await.unwrap());
    assert_eq!(session.current_key(), &ExamKey::new("b"));
    assert_eq!(session.runtime().state(), &PartState::Initializing);
    assert!(!session.is_finished());
    assert_eq!(returned.load(Ordering::SeqCst), 0);

    // The next part loads on the following tick.
    session.tick().await.unwrap();
    assert_eq!(session.runtime().state(), &PartState::AnswerableLoaded);
}

#[tokio::test]
async fn finishing_the_last_part_scores_once_and_returns_to_origin() {
    let clock = fixed_clock();
    let store = InMemorySessionStore::new();
    let remote = FakeRemote::default()
        .with_payload("a", payload(1, 10))
        .with_payload("b", payload(1, 10));
    let chain = ExamChain::new(vec![entry("a", 1), entry("b", 2)]).unwrap();
    let course = CourseLink {
        topic_id: TopicId::new(3),
        quiz_id: QuizId::new(4),
    };
    let (returned, back) = counter();
    let mut session = services(&clock, &store, &remote)
        .start_session(chain, options(Some("b"), Some(course)), back)
        .await
        .unwrap();
    start(&mut session).await;

    session.submit().await.unwrap();

    // Navigation back does not wait for the scoring requests.
    assert!(session.is_finished());
    assert_eq!(returned.load(Ordering::SeqCst), 1);
    session.settle().await;
    assert_eq!(remote.scoring(), vec![ScheduleId::new(SCHEDULE)]);
    assert_eq!(
        remote.course_completions(),
        vec![(TopicId::new(3), QuizId::new(4))]
    );

    clock.advance(Duration::minutes(20));
    session.tick().await.unwrap();
    session.settle().await;
    let err = session.submit().await.unwrap_err();
    assert!(matches!(err, RuntimeError::Transition(_)));
    assert_eq!(remote.scoring().len(), 1);
    assert_eq!(remote.submissions().len(), 1);
    assert_eq!(returned.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_submit_holds_the_chain_until_retry_succeeds() {
    let clock = fixed_clock();
    let store = InMemorySessionStore::new();
    let remote = FakeRemote::default()
        .with_payload("a", payload(1, 10))
        .with_payload("b", payload(1, 10));
    let chain = ExamChain::new(vec![entry("a", 1), entry("b", 2)]).unwrap();
    let (_, back) = counter();
    let mut session = services(&clock, &store, &remote)
        .start_session(chain, options(None, None), back)
        .await
        .unwrap();
    start(&mut session).await;

    remote.set_fail_submit(true);
    session.submit().await.unwrap();
    assert_eq!(session.current_key(), &ExamKey::new("a"));
    assert!(session.view().can_retry_submit);

    remote.set_fail_submit(false);
    session.retry_submit().await.unwrap();
    assert_eq!(session.current_key(), &ExamKey::new("b"));
    assert!(!store.exists(&ExamKey::new("a")).await.unwrap());
}

#[tokio::test]
async fn accepted_part_with_stuck_record_resumes_at_the_next_part() {
    let clock = fixed_clock();
    let memory = InMemorySessionStore::new();
    let store = FlakyDeleteStore::over(&memory);
    let remote = FakeRemote::default()
        .with_payload("a", payload(1, 10))
        .with_payload("b", payload(1, 10));
    let chain = || ExamChain::new(vec![entry("a", 1), entry("b", 2)]).unwrap();
    let services = ExamServices::from_parts(
        RuntimeConfig::new(RemoteConfig::new("http://exam.test/api/")),
        clock.clone(),
        Arc::new(store.clone()),
        Arc::new(remote.clone()),
    );

    let (_, back) = counter();
    let mut session = services
        .start_session(chain(), options(None, None), back)
        .await
        .unwrap();
    start(&mut session).await;
    store.set_fail_delete(true);
    session.submit().await.unwrap();
    assert_eq!(session.current_key(), &ExamKey::new("b"));
    let leftover = memory.get(&ExamKey::new("a")).await.unwrap().unwrap();
    assert!(leftover.is_acknowledged());
    drop(session);

    store.set_fail_delete(false);
    let (_, back) = counter();
    let mut session = services
        .start_session(chain(), options(None, None), back)
        .await
        .unwrap();
    assert_eq!(session.current_key(), &ExamKey::new("b"));
    assert!(!memory.exists(&ExamKey::new("a")).await.unwrap());

    start(&mut session).await;
    assert_eq!(remote.submissions().len(), 1);
}
