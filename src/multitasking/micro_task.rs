use crate::error::MapError;

/// A resumable computation. Each `resume` does a bounded amount of work and returns.
///
/// `get_result` yields `None` while the task is alive. Once `alive` turns false the
/// result is fixed and every further call returns the same value.
pub trait MicroTask: Send + Sync {
    type Output: Clone + Send + Sync + 'static;

    fn resume(&mut self) -> Result<(), MapError>;

    fn alive(&self) -> bool;

    fn get_result(&self) -> Option<Self::Output>;
}

impl<M: MicroTask + ?Sized> MicroTask for Box<M> {
    type Output = M::Output;

    fn resume(&mut self) -> Result<(), MapError> {
        (**self).resume()
    }

    fn alive(&self) -> bool {
        (**self).alive()
    }

    fn get_result(&self) -> Option<Self::Output> {
        (**self).get_result()
    }
}

pub type BoxedTask<T> = Box<dyn MicroTask<Output = T>>;

fn finished_result<M: MicroTask + ?Sized>(task: &M) -> Result<M::Output, MapError> {
    task.get_result()
        .ok_or_else(|| MapError::Task("finished task has no result".to_string()))
}

pub trait MicroTaskExt: MicroTask + Sized {
    /// Transforms the result once, after the task finished.
    fn map<R, F>(self, f: F) -> Map<Self, F, R>
    where
        R: Clone + Send + Sync + 'static,
        F: FnOnce(Self::Output) -> R + Send + Sync,
    {
        Map::new(self, f)
    }

    /// Chains the task produced from this task's result.
    fn flat_map<U, F>(self, f: F) -> FlatMap<Self, F, U>
    where
        U: MicroTask,
        F: FnOnce(Self::Output) -> U + Send + Sync,
    {
        FlatMap::new(self, f)
    }

    fn boxed(self) -> BoxedTask<Self::Output>
    where
        Self: 'static,
    {
        Box::new(self)
    }
}

impl<M: MicroTask> MicroTaskExt for M {}

pub struct Map<T, F, R> {
    task: T,
    f: Option<F>,
    result: Option<R>,
}

impl<T, F, R> Map<T, F, R>
where
    T: MicroTask,
    R: Clone + Send + Sync + 'static,
    F: FnOnce(T::Output) -> R + Send + Sync,
{
    fn new(task: T, f: F) -> Self {
        let mut map = Map {
            task,
            f: Some(f),
            result: None,
        };
        if !map.task.alive() {
            // A dead task without a result is reported by the next resume.
            let _ = map.settle();
        }
        map
    }

    fn settle(&mut self) -> Result<(), MapError> {
        if self.f.is_some() {
            let value = finished_result(&self.task)?;
            if let Some(f) = self.f.take() {
                self.result = Some(f(value));
            }
        }
        Ok(())
    }
}

impl<T, F, R> MicroTask for Map<T, F, R>
where
    T: MicroTask,
    R: Clone + Send + Sync + 'static,
    F: FnOnce(T::Output) -> R + Send + Sync,
{
    type Output = R;

    fn resume(&mut self) -> Result<(), MapError> {
        if self.task.alive() {
            self.task.resume()?;
        }
        if !self.task.alive() {
            self.settle()?;
        }
        Ok(())
    }

    fn alive(&self) -> bool {
        self.result.is_none()
    }

    fn get_result(&self) -> Option<R> {
        self.result.clone()
    }
}

pub struct FlatMap<T, F, U> {
    first: T,
    f: Option<F>,
    second: Option<U>,
}

impl<T, F, U> FlatMap<T, F, U>
where
    T: MicroTask,
    U: MicroTask,
    F: FnOnce(T::Output) -> U + Send + Sync,
{
    fn new(first: T, f: F) -> Self {
        let mut flat_map = FlatMap {
            first,
            f: Some(f),
            second: None,
        };
        if !flat_map.first.alive() {
            // A dead task without a result is reported by the next resume.
            let _ = flat_map.start_second();
        }
        flat_map
    }

    fn start_second(&mut self) -> Result<(), MapError> {
        if self.f.is_some() {
            let value = finished_result(&self.first)?;
            if let Some(f) = self.f.take() {
                self.second = Some(f(value));
            }
        }
        Ok(())
    }
}

impl<T, F, U> MicroTask for FlatMap<T, F, U>
where
    T: MicroTask,
    U: MicroTask,
    F: FnOnce(T::Output) -> U + Send + Sync,
{
    type Output = U::Output;

    fn resume(&mut self) -> Result<(), MapError> {
        if let Some(second) = &mut self.second {
            if second.alive() {
                second.resume()?;
            }
            return Ok(());
        }
        if self.first.alive() {
            self.first.resume()?;
        }
        if !self.first.alive() {
            self.start_second()?;
        }
        Ok(())
    }

    fn alive(&self) -> bool {
        match &self.second {
            Some(second) => second.alive(),
            None => true,
        }
    }

    fn get_result(&self) -> Option<U::Output> {
        self.second.as_ref().and_then(|second| second.get_result())
    }
}

/// Runs `first` to completion, then `second`.
pub fn pair<A: MicroTask, B: MicroTask>(first: A, second: B) -> Pair<A, B> {
    Pair { first, second }
}

pub struct Pair<A, B> {
    first: A,
    second: B,
}

impl<A: MicroTask, B: MicroTask> MicroTask for Pair<A, B> {
    type Output = (A::Output, B::Output);

    fn resume(&mut self) -> Result<(), MapError> {
        if self.first.alive() {
            self.first.resume()
        } else if self.second.alive() {
            self.second.resume()
        } else {
            Ok(())
        }
    }

    fn alive(&self) -> bool {
        self.first.alive() || self.second.alive()
    }

    fn get_result(&self) -> Option<Self::Output> {
        if self.alive() {
            return None;
        }
        Some((self.first.get_result()?, self.second.get_result()?))
    }
}

/// Runs the tasks one after another and collects their results in order.
pub fn join<T: MicroTask>(tasks: Vec<T>) -> Join<T> {
    Join { tasks, current: 0 }
}

pub struct Join<T> {
    tasks: Vec<T>,
    current: usize,
}

impl<T: MicroTask> MicroTask for Join<T> {
    type Output = Vec<T::Output>;

    fn resume(&mut self) -> Result<(), MapError> {
        while let Some(task) = self.tasks.get_mut(self.current) {
            if task.alive() {
                task.resume()?;
                if !task.alive() {
                    self.current += 1;
                }
                return Ok(());
            }
            self.current += 1;
        }
        Ok(())
    }

    fn alive(&self) -> bool {
        self.tasks[self.current.min(self.tasks.len())..]
            .iter()
            .any(|task| task.alive())
    }

    fn get_result(&self) -> Option<Self::Output> {
        if self.alive() {
            return None;
        }
        self.tasks.iter().map(|task| task.get_result()).collect()
    }
}

/// An already finished task.
pub fn constant<T: Clone + Send + Sync + 'static>(value: T) -> Constant<T> {
    Constant(value)
}

pub struct Constant<T>(T);

impl<T: Clone + Send + Sync + 'static> MicroTask for Constant<T> {
    type Output = T;

    fn resume(&mut self) -> Result<(), MapError> {
        Ok(())
    }

    fn alive(&self) -> bool {
        false
    }

    fn get_result(&self) -> Option<T> {
        Some(self.0.clone())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    /// Finishes after `steps` resumes with `value`.
    pub(crate) struct Steps<T> {
        pub left: usize,
        pub value: T,
    }

    impl<T: Clone + Send + Sync + 'static> MicroTask for Steps<T> {
        type Output = T;

        fn resume(&mut self) -> Result<(), MapError> {
            self.left = self.left.saturating_sub(1);
            Ok(())
        }

        fn alive(&self) -> bool {
            self.left > 0
        }

        fn get_result(&self) -> Option<T> {
            (!self.alive()).then(|| self.value.clone())
        }
    }

    fn run<M: MicroTask>(task: &mut M) -> usize {
        let mut resumes = 0;
        while task.alive() {
            task.resume().unwrap();
            resumes += 1;
        }
        resumes
    }

    #[test]
    fn result_is_stable_after_finish() {
        let mut task = Steps { left: 3, value: 7 };
        assert_eq!(task.get_result(), None);
        run(&mut task);
        assert_eq!(task.get_result(), Some(7));
        assert_eq!(task.get_result(), Some(7));
    }

    #[test]
    fn map_runs_function_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut task = Steps { left: 2, value: 20 }.map(move |v| {
            counter.fetch_add(1, Ordering::SeqCst);
            v + 1
        });
        assert_eq!(run(&mut task), 2);
        assert_eq!(task.get_result(), Some(21));
        assert_eq!(task.get_result(), Some(21));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn flat_map_is_alive_until_second_finishes() {
        let mut task = Steps { left: 2, value: 3 }.flat_map(|n| Steps { left: n, value: n * 10 });
        let mut trace = Vec::new();
        while task.alive() {
            task.resume().unwrap();
            trace.push(task.alive());
        }
        // 2 resumes for the first task, 3 for the second.
        assert_eq!(trace, [true, true, true, true, false]);
        assert_eq!(task.get_result(), Some(30));
    }

    #[test]
    fn flat_map_over_finished_task_starts_second_immediately() {
        let task = constant(0usize).flat_map(|n| Steps { left: n, value: "done" });
        assert!(!task.alive());
        assert_eq!(task.get_result(), Some("done"));

        let task = constant(1usize).flat_map(|n| Steps { left: n, value: "done" });
        assert!(task.alive());
        assert_eq!(task.get_result(), None);
    }

    /// Finished, but never produced a value.
    struct Hollow;

    impl MicroTask for Hollow {
        type Output = u32;

        fn resume(&mut self) -> Result<(), MapError> {
            Ok(())
        }

        fn alive(&self) -> bool {
            false
        }

        fn get_result(&self) -> Option<u32> {
            None
        }
    }

    #[test]
    fn combinators_over_a_hollow_task_fail_on_resume() {
        let mut mapped = Hollow.map(|v| v + 1);
        assert!(mapped.alive());
        assert!(matches!(mapped.resume(), Err(MapError::Task(_))));
        assert!(mapped.resume().is_err());

        let mut chained = Hollow.flat_map(|v| constant(v * 2));
        assert!(chained.alive());
        assert!(matches!(chained.resume(), Err(MapError::Task(_))));
    }

    #[test]
    fn pair_and_join_run_sequentially() {
        let mut both = pair(Steps { left: 1, value: 'a' }, Steps { left: 2, value: 'b' });
        assert_eq!(run(&mut both), 3);
        assert_eq!(both.get_result(), Some(('a', 'b')));

        let mut all = join(vec![
            Steps { left: 2, value: 1 },
            Steps { left: 0, value: 2 },
            Steps { left: 1, value: 3 },
        ]);
        assert_eq!(run(&mut all), 3);
        assert_eq!(all.get_result(), Some(vec![1, 2, 3]));
    }
}
