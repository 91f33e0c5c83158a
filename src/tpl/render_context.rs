use crate::expr::Variables;
use crate::model::Value;
use std::collections::HashMap;

/// 渲染作用域：局部帧栈叠加在根数据模型之上
pub struct Scope<'a> {
    root: &'a dyn Variables,
    frames: Vec<HashMap<String, Value>>,
}

impl<'a> Scope<'a> {
    pub fn new(root: &'a dyn Variables) -> Self {
        Self {
            root,
            frames: vec![HashMap::new()],
        }
    }

    pub fn push_frame(&mut self) {
        self.frames.push(HashMap::new());
    }

    pub fn pop_frame(&mut self) {
        // 最底层帧保存模板顶层的赋值
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// 在当前帧中绑定变量，遮蔽外层同名变量
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(name.into(), value);
        }
    }

    /// 暂时移除 `depth` 之上的帧，用于在调用方作用域中渲染混入的 block
    pub fn split_off(&mut self, depth: usize) -> Vec<HashMap<String, Value>> {
        self.frames.split_off(depth.max(1).min(self.frames.len()))
    }

    pub fn restore(&mut self, frames: Vec<HashMap<String, Value>>) {
        self.frames.extend(frames);
    }
}

impl Variables for Scope<'_> {
    fn lookup(&self, name: &str) -> Option<&Value> {
        // 先查局部帧（从内向外以支持遮蔽），再查根模型
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.get(name))
            .or_else(|| self.root.lookup(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_shadow_root() {
        let mut root = HashMap::new();
        root.insert("name".to_string(), Value::from("root"));
        root.insert("site".to_string(), Value::from("x"));

        let mut scope = Scope::new(&root);
        assert_eq!(scope.lookup("name"), Some(&Value::from("root")));

        scope.push_frame();
        scope.set("name", Value::from("inner"));
        assert_eq!(scope.lookup("name"), Some(&Value::from("inner")));
        assert_eq!(scope.lookup("site"), Some(&Value::from("x")));

        scope.pop_frame();
        assert_eq!(scope.lookup("name"), Some(&Value::from("root")));
    }

    #[test]
    fn test_split_off_and_restore() {
        let root: HashMap<String, Value> = HashMap::new();
        let mut scope = Scope::new(&root);
        scope.set("outer", Value::Int(1));
        let depth = scope.depth();

        scope.push_frame();
        scope.set("param", Value::Int(2));

        let saved = scope.split_off(depth);
        assert_eq!(scope.lookup("param"), None);
        assert_eq!(scope.lookup("outer"), Some(&Value::Int(1)));

        scope.restore(saved);
        assert_eq!(scope.lookup("param"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_bottom_frame_is_never_popped() {
        let root: HashMap<String, Value> = HashMap::new();
        let mut scope = Scope::new(&root);
        scope.pop_frame();
        scope.set("x", Value::Int(1));
        assert_eq!(scope.lookup("x"), Some(&Value::Int(1)));
    }
}
