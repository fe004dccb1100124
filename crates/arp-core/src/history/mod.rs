//! Undo/redo action log

mod action;

use std::collections::HashSet;

use crate::error::SceneResult;
use crate::scene::Scene;

pub use action::{Action, NodeMove};

/// Notified after an action has been undone or redone
pub trait ActionObserver {
    fn action_undone(&mut self, action: &Action);
    fn action_redone(&mut self, action: &Action);
}

/// Undo and redo stacks of user actions
#[derive(Default)]
pub struct ActionLog {
    undo_stack: Vec<Action>,
    redo_stack: Vec<Action>,
    observer: Option<Box<dyn ActionObserver>>,
}

impl std::fmt::Debug for ActionLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionLog")
            .field("undo_stack", &self.undo_stack.len())
            .field("redo_stack", &self.redo_stack.len())
            .finish()
    }
}

impl ActionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_observer(&mut self, observer: Box<dyn ActionObserver>) {
        self.observer = Some(observer);
    }

    /// Record an action the user just performed.
    ///
    /// Clears the redo stack. An action that turns paths into a solid also
    /// drops every recorded path-drawing step. Detached nodes no remaining
    /// action refers to are released afterwards.
    pub fn action_done(&mut self, scene: &mut Scene, action: Action) -> SceneResult<()> {
        if action.is_final_shape() {
            let before = self.undo_stack.len() + self.redo_stack.len();
            self.undo_stack.retain(|a| !a.is_path_action());
            self.redo_stack.retain(|a| !a.is_path_action());
            let purged = before - self.undo_stack.len() - self.redo_stack.len();
            if purged > 0 {
                tracing::debug!("Dropped {} path drawing steps", purged);
            }
        }
        self.redo_stack.clear();
        tracing::info!("Action done: {}", action.name());
        self.undo_stack.push(action);
        self.release_orphans(scene)
    }

    /// Undo the latest action. Returns `false` when there is nothing to undo.
    ///
    /// The action moves to the redo stack even if applying it failed.
    pub fn undo(&mut self, scene: &mut Scene) -> SceneResult<bool> {
        let Some(action) = self.undo_stack.pop() else {
            return Ok(false);
        };
        tracing::info!("Undo: {}", action.name());
        let result = action.undo(scene);
        if let Err(e) = &result {
            tracing::warn!("Undo of {} failed: {}", action.name(), e);
        }
        if let Some(observer) = self.observer.as_mut() {
            observer.action_undone(&action);
        }
        self.redo_stack.push(action);
        result.map(|_| true)
    }

    /// Redo the latest undone action. Returns `false` when there is nothing to redo.
    pub fn redo(&mut self, scene: &mut Scene) -> SceneResult<bool> {
        let Some(action) = self.redo_stack.pop() else {
            return Ok(false);
        };
        tracing::info!("Redo: {}", action.name());
        let result = action.redo(scene);
        if let Err(e) = &result {
            tracing::warn!("Redo of {} failed: {}", action.name(), e);
        }
        if let Some(observer) = self.observer.as_mut() {
            observer.action_redone(&action);
        }
        self.undo_stack.push(action);
        result.map(|_| true)
    }

    /// Forget all actions and release the nodes only they kept alive
    pub fn reset(&mut self, scene: &mut Scene) -> SceneResult<()> {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.release_orphans(scene)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo_stack.len()
    }

    /// Recorded actions, oldest first
    pub fn undo_stack(&self) -> &[Action] {
        &self.undo_stack
    }

    pub fn redo_stack(&self) -> &[Action] {
        &self.redo_stack
    }

    fn release_orphans(&mut self, scene: &mut Scene) -> SceneResult<()> {
        let referenced: HashSet<_> = self
            .undo_stack
            .iter()
            .chain(self.redo_stack.iter())
            .flat_map(Action::nodes)
            .collect();
        let released = scene.release_unreferenced(&referenced)?;
        if released > 0 {
            tracing::debug!("Released {} detached nodes", released);
        }
        Ok(())
    }
}
