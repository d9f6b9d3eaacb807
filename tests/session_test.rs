mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{collecting_system, shared};
use pretty_assertions::assert_eq;
use scxml_runtime::session::SessionError;
use scxml_runtime::{
    Action, ChartBuilder, ExecutorStatus, InternalResult, RuntimeSession, SendDef, SessionManager,
    StateChart, StateDef, TransitionDef, TriggerEvent,
};

fn waiting_chart() -> Arc<StateChart> {
    shared(
        ChartBuilder::new()
            .state(StateDef::state("waiting").transition(TransitionDef::on("finish").target("done")))
            .state(StateDef::final_state("done"))
            .build()
            .unwrap(),
    )
}

#[tokio::test]
async fn test_session_runs_until_final() -> InternalResult<()> {
    let (system, _) = collecting_system();
    let manager = SessionManager::new(system.clone());
    let id = manager.spawn(waiting_chart())?;
    assert!(system.session_queue(&id).is_some());

    manager.send_event(&id, TriggerEvent::signal("finish"))?;
    tokio::time::timeout(Duration::from_secs(5), manager.join(&id))
        .await
        .expect("session should finish")?;

    let session = manager.session(&id).expect("session is still known");
    assert_eq!(session.status().await, ExecutorStatus::Final);
    Ok(())
}

#[tokio::test]
async fn test_delayed_event_wakes_the_session() -> InternalResult<()> {
    let (system, _) = collecting_system();
    let manager = SessionManager::new(system);
    let chart = shared(
        ChartBuilder::new()
            .state(
                StateDef::state("waiting")
                    .on_entry(vec![Action::send(SendDef::event("finish").delay("20ms"))])
                    .transition(TransitionDef::on("finish").target("done")),
            )
            .state(StateDef::final_state("done"))
            .build()?,
    );
    let id = manager.spawn(chart)?;
    tokio::time::timeout(Duration::from_secs(5), manager.join(&id))
        .await
        .expect("delayed event should end the session")?;
    let session = manager.session(&id).expect("session is still known");
    assert_eq!(session.status().await, ExecutorStatus::Final);
    Ok(())
}

#[tokio::test]
async fn test_shutdown_closes_running_sessions() -> InternalResult<()> {
    let (system, _) = collecting_system();
    let manager = SessionManager::new(system);
    let first = manager.spawn(waiting_chart())?;
    let second = manager.spawn(waiting_chart())?;
    assert_eq!(manager.session_ids().len(), 2);

    manager.shutdown_session(&first).await?;
    let session = manager.session(&first).expect("session is still known");
    assert_eq!(session.status().await, ExecutorStatus::Closed);

    manager.shutdown_all().await?;
    let session = manager.session(&second).expect("session is still known");
    assert_eq!(session.status().await, ExecutorStatus::Closed);
    Ok(())
}

#[tokio::test]
async fn test_unknown_session_is_reported() {
    let (system, _) = collecting_system();
    let manager = SessionManager::new(system);
    assert!(matches!(
        manager.send_event("nope", TriggerEvent::signal("x")),
        Err(SessionError::NotFound(id)) if id == "nope"
    ));
    assert!(matches!(
        manager.shutdown_session("nope").await,
        Err(SessionError::NotFound(_))
    ));
}

#[test]
fn test_spawn_needs_a_runtime() {
    let (system, _) = collecting_system();
    let manager = SessionManager::new(system);
    assert!(matches!(
        manager.spawn(waiting_chart()),
        Err(SessionError::NoRuntime)
    ));
}

#[tokio::test]
async fn test_restored_session_resumes() -> InternalResult<()> {
    let (system, _) = collecting_system();
    let chart = waiting_chart();
    let mut executor = system.new_executor(chart.clone())?;
    executor.go()?;
    let snapshot = executor.snapshot()?;
    drop(executor);

    let manager = SessionManager::new(system.clone());
    let id = manager.spawn_executor(system.restore_executor(chart, snapshot)?)?;
    manager.send_event(&id, TriggerEvent::signal("finish"))?;
    tokio::time::timeout(Duration::from_secs(5), manager.join(&id))
        .await
        .expect("restored session should finish")?;
    let session = manager.session(&id).expect("session is still known");
    assert_eq!(session.status().await, ExecutorStatus::Final);
    Ok(())
}
