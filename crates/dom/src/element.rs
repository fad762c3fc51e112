/// 具名的 XML 元素：有序屬性、有序子元素與可選文字。 / A named element with ordered attributes, ordered children and optional text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
    text: Option<String>,
}

impl Element {
    /// 建立空元素。 / Creates an empty element with the given tag.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
            text: None,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attribute(key, value);
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// 取得屬性值。 / Returns the attribute value, if present.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.as_str())
    }

    /// 設定屬性；已存在則就地取代以保留順序。 / Sets an attribute, replacing in place so ordering is stable.
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(existing, _)| *existing == key) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((key, value)),
        }
    }

    pub fn remove_attribute(&mut self, key: &str) -> Option<String> {
        let index = self.attributes.iter().position(|(existing, _)| existing == key)?;
        Some(self.attributes.remove(index).1)
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn children(&self) -> &[Element] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut Vec<Element> {
        &mut self.children
    }

    pub fn add_child(&mut self, child: Element) {
        self.children.push(child);
    }

    /// 取出全部子元素並與父元素脫離。 / Detaches and returns every child element.
    pub fn take_children(&mut self) -> Vec<Element> {
        std::mem::take(&mut self.children)
    }

    /// 取出全部屬性。 / Detaches and returns every attribute.
    pub fn take_attributes(&mut self) -> Vec<(String, String)> {
        std::mem::take(&mut self.attributes)
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn set_text(&mut self, text: Option<String>) {
        self.text = text;
    }

    /// 沒有屬性、子元素與文字時為 `true`。 / `true` when the element carries no attributes, children or text.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.children.is_empty() && self.text.is_none()
    }

    /// Visits every attribute value and text node of this subtree.
    pub fn for_each_value_mut(&mut self, visit: &mut impl FnMut(&mut String)) {
        for (_, value) in self.attributes.iter_mut() {
            visit(value);
        }
        if let Some(text) = self.text.as_mut() {
            visit(text);
        }
        for child in self.children.iter_mut() {
            child.for_each_value_mut(visit);
        }
    }

    /// 將 `other` 疊加於自身：屬性逐一覆寫，`other` 出現過的子標籤整組取代。
    /// Overlays `other` onto `self`: attributes are overwritten one by one and every
    /// child tag present in `other` replaces the whole group of same-named children.
    pub fn overlay(&mut self, other: &Element) {
        for (key, value) in other.attributes() {
            self.set_attribute(key, value);
        }
        if other.text.is_some() {
            self.text = other.text.clone();
        }
        if other.children.is_empty() {
            return;
        }
        let replaced: Vec<&str> = other.children.iter().map(Element::name).collect();
        self.children
            .retain(|child| !replaced.contains(&child.name.as_str()));
        self.children.extend(other.children.iter().cloned());
    }
}
