//! 任务调度器
//!
//! 时间轮询式调度：到期时间 → 任务ID 的有序队列，后台循环按tick间隔
//! 扫描并触发到期任务。EVENT任务不进队列，挂在事件名索引上等待触发。
//! 任务的具体执行通过TaskRunner下发，调度器不关心执行细节。

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use collector_domain::{CollectionTask, ScheduleType, TaskRepository};
use collector_errors::{CollectorError, CollectorResult};

use crate::schedule::compute_next_execution_time;

/// 任务执行入口，由采集任务服务实现
///
/// 返回本次执行的execution_id。执行中的业务失败不通过Err表达，
/// Err只代表执行根本没能开始（任务不存在等）。
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run_task(&self, task_id: &str) -> CollectorResult<String>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SchedulerState {
    #[serde(rename = "STOPPED")]
    Stopped,
    #[serde(rename = "RUNNING")]
    Running,
}

/// 调度器运行状况快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStatistics {
    pub state: SchedulerState,
    pub started_at: Option<DateTime<Utc>>,
    pub uptime_secs: Option<i64>,
    /// 时间队列中的任务数
    pub queued_tasks: usize,
    /// 事件索引中的任务数
    pub event_tasks: usize,
    pub fired_count: u64,
    /// 按任务状态统计的任务数（键为ENABLED/PAUSED/DISABLED）
    pub tasks_by_status: HashMap<String, u64>,
}

#[derive(Default)]
struct QueueInner {
    /// 到期时间 → 任务ID列表
    queue: BTreeMap<DateTime<Utc>, Vec<String>>,
    /// 任务ID → 排定时间，用于取消
    scheduled: HashMap<String, DateTime<Utc>>,
    /// 事件名 → 任务ID列表
    event_index: HashMap<String, Vec<String>>,
}

impl QueueInner {
    fn remove_task(&mut self, task_id: &str) {
        if let Some(time) = self.scheduled.remove(task_id) {
            if let Some(ids) = self.queue.get_mut(&time) {
                ids.retain(|id| id != task_id);
                if ids.is_empty() {
                    self.queue.remove(&time);
                }
            }
        }
        for ids in self.event_index.values_mut() {
            ids.retain(|id| id != task_id);
        }
        self.event_index.retain(|_, ids| !ids.is_empty());
    }
}

/// 任务调度器
pub struct TaskScheduler {
    tasks: Arc<dyn TaskRepository>,
    runner: OnceLock<Arc<dyn TaskRunner>>,
    inner: Mutex<QueueInner>,
    tick_interval: Duration,
    state: RwLock<SchedulerState>,
    started_at: RwLock<Option<DateTime<Utc>>>,
    fired: AtomicU64,
    tick_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl TaskScheduler {
    pub fn new(tasks: Arc<dyn TaskRepository>, tick_interval: Duration) -> Self {
        Self {
            tasks,
            runner: OnceLock::new(),
            inner: Mutex::new(QueueInner::default()),
            tick_interval,
            state: RwLock::new(SchedulerState::Stopped),
            started_at: RwLock::new(None),
            fired: AtomicU64::new(0),
            tick_handle: Mutex::new(None),
        }
    }

    /// 注入执行入口，只能设置一次
    pub fn set_runner(&self, runner: Arc<dyn TaskRunner>) {
        if self.runner.set(runner).is_err() {
            warn!("TaskRunner已设置，忽略重复注入");
        }
    }

    pub async fn state(&self) -> SchedulerState {
        *self.state.read().await
    }

    /// 排定任务的下一次执行
    ///
    /// EVENT任务登记到事件索引；SIMPLE/CRON计算下次时间入队，
    /// 并把下次时间写回任务记录。返回排定的时间（EVENT为None）。
    pub async fn schedule_task(
        &self,
        task: &CollectionTask,
    ) -> CollectorResult<Option<DateTime<Utc>>> {
        if !task.is_enabled() {
            self.unschedule(&task.id).await;
            return Ok(None);
        }

        let mut inner = self.inner.lock().await;
        inner.remove_task(&task.id);

        if task.schedule_type == ScheduleType::Event {
            let event_name = task
                .schedule_config
                .get("event_name")
                .and_then(|v| v.as_str())
                .ok_or_else(|| CollectorError::invalid_schedule("EVENT调度缺少event_name"))?
                .to_string();
            inner
                .event_index
                .entry(event_name.clone())
                .or_default()
                .push(task.id.clone());
            drop(inner);
            debug!(task_id = %task.id, event = %event_name, "登记事件任务");
            return Ok(None);
        }

        let next = compute_next_execution_time(task.schedule_type, &task.schedule_config, Utc::now())?
            .ok_or_else(|| CollectorError::invalid_schedule("无法计算下次执行时间"))?;
        inner.queue.entry(next).or_default().push(task.id.clone());
        inner.scheduled.insert(task.id.clone(), next);
        drop(inner);

        // 只写下次执行时间，整行覆盖会吞掉并发执行提交的计数
        self.tasks.set_next_execution_time(&task.id, Some(next)).await?;

        debug!(task_id = %task.id, next = %next, "任务已入队");
        Ok(Some(next))
    }

    /// 从队列和事件索引中移除
    pub async fn unschedule(&self, task_id: &str) {
        self.inner.lock().await.remove_task(task_id);
    }

    /// 启动调度器：加载全部启用任务并开启扫描循环
    pub async fn start(self: Arc<Self>) -> CollectorResult<()> {
        {
            let mut state = self.state.write().await;
            if *state == SchedulerState::Running {
                return Ok(());
            }
            *state = SchedulerState::Running;
        }
        *self.started_at.write().await = Some(Utc::now());

        let mut scheduled = 0usize;
        for task in self.tasks.find_all().await? {
            if !task.is_enabled() || task.is_expired(Utc::now()) || task.reached_max_executions() {
                continue;
            }
            if let Err(e) = self.schedule_task(&task).await {
                warn!(task_id = %task.id, error = %e, "启动时排定任务失败");
            } else {
                scheduled += 1;
            }
        }
        info!(scheduled, tick = ?self.tick_interval, "任务调度器启动");

        let scheduler = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scheduler.tick_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                Arc::clone(&scheduler).tick(Utc::now()).await;
            }
        });
        *self.tick_handle.lock().await = Some(handle);
        Ok(())
    }

    pub async fn stop(&self) {
        *self.state.write().await = SchedulerState::Stopped;
        if let Some(handle) = self.tick_handle.lock().await.take() {
            handle.abort();
        }
        info!("任务调度器停止");
    }

    /// 单轮扫描：触发所有到期任务
    ///
    /// 每个任务在独立的tokio任务中执行，慢任务不阻塞扫描。
    pub async fn tick(self: Arc<Self>, now: DateTime<Utc>) {
        let due: Vec<String> = {
            let mut inner = self.inner.lock().await;
            let mut due = Vec::new();
            while let Some((&time, _)) = inner.queue.iter().next() {
                if time > now {
                    break;
                }
                let ids = inner.queue.remove(&time).unwrap_or_default();
                for id in &ids {
                    inner.scheduled.remove(id);
                }
                due.extend(ids);
            }
            due
        };

        for task_id in due {
            let scheduler = Arc::clone(&self);
            tokio::spawn(async move {
                scheduler.fire(&task_id).await;
                scheduler.requeue_after_run(&task_id).await;
            });
        }
    }

    async fn fire(&self, task_id: &str) {
        let Some(runner) = self.runner.get() else {
            warn!(task_id, "TaskRunner未注入，跳过执行");
            return;
        };
        self.fired.fetch_add(1, Ordering::SeqCst);
        match runner.run_task(task_id).await {
            Ok(execution_id) => {
                debug!(task_id, execution_id = %execution_id, "任务执行完成");
            }
            Err(e) => {
                warn!(task_id, error = %e, "任务执行未能开始");
            }
        }
    }

    /// 执行后按任务当前状态决定是否再次入队
    async fn requeue_after_run(&self, task_id: &str) {
        let task = match self.tasks.find_by_id(task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => return,
            Err(e) => {
                warn!(task_id, error = %e, "重新排定时读取任务失败");
                return;
            }
        };
        let now = Utc::now();
        if !task.is_enabled() || task.is_expired(now) || task.reached_max_executions() {
            debug!(task_id, "任务不再满足调度条件，停止排定");
            return;
        }
        if let Err(e) = self.schedule_task(&task).await {
            warn!(task_id, error = %e, "重新排定失败");
        }
    }

    /// 触发事件，返回被触发的任务ID
    pub async fn trigger_event(&self, event_name: &str) -> CollectorResult<Vec<String>> {
        if self.state().await != SchedulerState::Running {
            return Err(CollectorError::SchedulerNotRunning);
        }
        let task_ids: Vec<String> = self
            .inner
            .lock()
            .await
            .event_index
            .get(event_name)
            .cloned()
            .unwrap_or_default();

        info!(event = %event_name, count = task_ids.len(), "事件触发");
        for task_id in &task_ids {
            let Some(runner) = self.runner.get() else {
                warn!(task_id, "TaskRunner未注入，跳过事件任务");
                break;
            };
            let runner = Arc::clone(runner);
            let task_id = task_id.clone();
            self.fired.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                if let Err(e) = runner.run_task(&task_id).await {
                    warn!(task_id = %task_id, error = %e, "事件任务执行未能开始");
                }
            });
        }
        Ok(task_ids)
    }

    /// 清理已过期的任务（软删除并移出队列），返回清理数量
    pub async fn cleanup_expired_tasks(&self) -> CollectorResult<u64> {
        let now = Utc::now();
        let mut cleaned = 0u64;
        for task in self.tasks.find_all().await? {
            if task.is_expired(now) {
                self.tasks.delete(&task.id).await?;
                self.unschedule(&task.id).await;
                info!(task_id = %task.id, name = %task.name, "清理过期任务");
                cleaned += 1;
            }
        }
        Ok(cleaned)
    }

    pub async fn statistics(&self) -> CollectorResult<SchedulerStatistics> {
        let started_at = *self.started_at.read().await;
        let inner = self.inner.lock().await;
        let queued_tasks = inner.scheduled.len();
        let event_tasks = inner.event_index.values().map(|ids| ids.len()).sum();
        drop(inner);

        let mut tasks_by_status: HashMap<String, u64> = HashMap::new();
        for task in self.tasks.find_all().await? {
            let key = serde_json::to_value(task.status)?
                .as_str()
                .unwrap_or("UNKNOWN")
                .to_string();
            *tasks_by_status.entry(key).or_insert(0) += 1;
        }

        Ok(SchedulerStatistics {
            state: self.state().await,
            started_at,
            uptime_secs: started_at.map(|t| (Utc::now() - t).num_seconds()),
            queued_tasks,
            event_tasks,
            fired_count: self.fired.load(Ordering::SeqCst),
            tasks_by_status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use collector_infrastructure::InMemoryTaskRepository;
    use mockall::mock;
    use serde_json::{json, Map, Value};

    mock! {
        Runner {}

        #[async_trait]
        impl TaskRunner for Runner {
            async fn run_task(&self, task_id: &str) -> CollectorResult<String>;
        }
    }

    fn simple_task(name: &str, secs: u64) -> CollectionTask {
        let mut config = Map::new();
        config.insert("frequency".to_string(), Value::from(secs));
        CollectionTask::new(name, ScheduleType::Simple, config)
    }

    async fn scheduler_with(
        repo: Arc<InMemoryTaskRepository>,
        runner: MockRunner,
    ) -> Arc<TaskScheduler> {
        let scheduler = Arc::new(TaskScheduler::new(repo, Duration::from_secs(5)));
        scheduler.set_runner(Arc::new(runner));
        scheduler
    }

    #[tokio::test]
    async fn test_simple_task_scheduled_at_interval() {
        let repo = Arc::new(InMemoryTaskRepository::new());
        let task = repo.create(&simple_task("t", 300)).await.unwrap();
        let scheduler = scheduler_with(Arc::clone(&repo), MockRunner::new()).await;

        let before = Utc::now();
        let next = scheduler.schedule_task(&task).await.unwrap().unwrap();
        let after = Utc::now();

        assert!(next >= before + ChronoDuration::seconds(300));
        assert!(next <= after + ChronoDuration::seconds(300));
        // 下次时间写回了任务记录
        let stored = repo.find_by_id(&task.id).await.unwrap().unwrap();
        assert_eq!(stored.next_execution_time, Some(next));
    }

    #[tokio::test]
    async fn test_schedule_write_back_keeps_concurrent_counter_update() {
        let repo = Arc::new(InMemoryTaskRepository::new());
        let task = repo.create(&simple_task("t", 300)).await.unwrap();
        let scheduler = scheduler_with(Arc::clone(&repo), MockRunner::new()).await;

        // 排定前另一次执行已提交了计数更新，排定用的仍是旧快照
        let mut counted = task.clone();
        counted.execution_count = 1;
        repo.update(&counted).await.unwrap();

        scheduler.schedule_task(&task).await.unwrap();

        let stored = repo.find_by_id(&task.id).await.unwrap().unwrap();
        assert_eq!(stored.execution_count, 1);
        assert!(stored.next_execution_time.is_some());
    }

    #[tokio::test]
    async fn test_tick_fires_due_task_and_requeues() {
        let repo = Arc::new(InMemoryTaskRepository::new());
        let task = repo.create(&simple_task("t", 1)).await.unwrap();

        let mut runner = MockRunner::new();
        runner
            .expect_run_task()
            .times(1)
            .returning(|_| Ok("exec-1".to_string()));
        let scheduler = scheduler_with(Arc::clone(&repo), runner).await;

        scheduler.schedule_task(&task).await.unwrap();
        // 把时钟拨过到期时间
        Arc::clone(&scheduler)
            .tick(Utc::now() + ChronoDuration::seconds(2))
            .await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let stats = scheduler.statistics().await.unwrap();
        assert_eq!(stats.fired_count, 1);
        // 任务仍启用，执行后重新入队
        assert_eq!(stats.queued_tasks, 1);
    }

    #[tokio::test]
    async fn test_disabled_task_is_not_requeued() {
        let repo = Arc::new(InMemoryTaskRepository::new());
        let mut task = simple_task("t", 1);
        task.max_executions = Some(1);
        let task = repo.create(&task).await.unwrap();

        // 执行服务会递增计数，这里用一个最小实现模拟
        struct CountingRunner {
            repo: Arc<InMemoryTaskRepository>,
        }
        #[async_trait]
        impl TaskRunner for CountingRunner {
            async fn run_task(&self, task_id: &str) -> CollectorResult<String> {
                let mut task = self.repo.find_by_id(task_id).await?.unwrap();
                task.execution_count += 1;
                self.repo.update(&task).await?;
                Ok("exec-1".to_string())
            }
        }

        let scheduler = Arc::new(TaskScheduler::new(
            Arc::clone(&repo) as Arc<dyn collector_domain::TaskRepository>,
            Duration::from_secs(5),
        ));
        scheduler.set_runner(Arc::new(CountingRunner {
            repo: Arc::clone(&repo),
        }));

        scheduler.schedule_task(&task).await.unwrap();
        Arc::clone(&scheduler)
            .tick(Utc::now() + ChronoDuration::seconds(2))
            .await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        // 达到最大执行次数，不再排定
        assert_eq!(scheduler.statistics().await.unwrap().queued_tasks, 0);
    }

    #[tokio::test]
    async fn test_event_task_fires_on_trigger_only() {
        let repo = Arc::new(InMemoryTaskRepository::new());
        let mut config = Map::new();
        config.insert("event_name".to_string(), json!("door_open"));
        let task = repo
            .create(&CollectionTask::new("evt", ScheduleType::Event, config))
            .await
            .unwrap();

        let mut runner = MockRunner::new();
        runner
            .expect_run_task()
            .times(1)
            .returning(|_| Ok("exec-1".to_string()));
        let scheduler = scheduler_with(Arc::clone(&repo), runner).await;
        Arc::clone(&scheduler).start().await.unwrap();

        // 事件任务不进时间队列
        assert_eq!(scheduler.statistics().await.unwrap().queued_tasks, 0);
        assert_eq!(scheduler.statistics().await.unwrap().event_tasks, 1);

        let fired = scheduler.trigger_event("door_open").await.unwrap();
        assert_eq!(fired, vec![task.id.clone()]);
        assert!(scheduler.trigger_event("unknown").await.unwrap().is_empty());
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_trigger_event_requires_running() {
        let repo = Arc::new(InMemoryTaskRepository::new());
        let scheduler = scheduler_with(repo, MockRunner::new()).await;
        assert!(matches!(
            scheduler.trigger_event("door_open").await,
            Err(CollectorError::SchedulerNotRunning)
        ));
    }

    #[tokio::test]
    async fn test_cleanup_expired_tasks() {
        let repo = Arc::new(InMemoryTaskRepository::new());
        let mut expired = simple_task("expired", 60);
        expired.expire_time = Some(Utc::now() - ChronoDuration::hours(1));
        repo.create(&expired).await.unwrap();
        let alive = repo.create(&simple_task("alive", 60)).await.unwrap();

        let scheduler = scheduler_with(Arc::clone(&repo), MockRunner::new()).await;
        assert_eq!(scheduler.cleanup_expired_tasks().await.unwrap(), 1);

        let remaining = repo.find_all().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, alive.id);
        // 幂等
        assert_eq!(scheduler.cleanup_expired_tasks().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unschedule_removes_from_queue() {
        let repo = Arc::new(InMemoryTaskRepository::new());
        let task = repo.create(&simple_task("t", 300)).await.unwrap();
        let scheduler = scheduler_with(Arc::clone(&repo), MockRunner::new()).await;

        scheduler.schedule_task(&task).await.unwrap();
        assert_eq!(scheduler.statistics().await.unwrap().queued_tasks, 1);
        scheduler.unschedule(&task.id).await;
        assert_eq!(scheduler.statistics().await.unwrap().queued_tasks, 0);
    }
}
