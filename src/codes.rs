//! Static reference tables for the feed's disaster-type and severity-level
//! codes.

/// Label returned for any code missing from the tables.
pub const UNKNOWN_LABEL: &str = "未知";

const DISASTER_TYPES: &[(&str, &str)] = &[
    ("01", "台风"),
    ("02", "暴雨"),
    ("03", "暴雪"),
    ("04", "寒潮"),
    ("05", "大风"),
    ("06", "沙尘暴"),
    ("07", "高温"),
    ("08", "干旱"),
    ("09", "雷电"),
    ("10", "冰雹"),
    ("11", "霜冻"),
    ("12", "大雾"),
    ("13", "霾"),
    ("14", "道路结冰"),
    ("51", "海上大雾"),
    ("52", "雷暴大风"),
    ("53", "持续低温"),
    ("54", "浓浮尘"),
    ("55", "龙卷风"),
    ("56", "低温冻害"),
    ("57", "海上大风"),
    ("58", "低温雨雪冰冻"),
    ("59", "强对流"),
    ("60", "臭氧"),
    ("61", "大雪"),
    ("62", "强降雨"),
    ("63", "强降温"),
    ("64", "雪灾"),
    ("65", "森林（草原）火险"),
    ("66", "雷暴"),
    ("67", "严寒"),
    ("68", "沙尘"),
    ("69", "海上雷雨大风"),
    ("70", "海上雷电"),
    ("71", "海上台风"),
    ("72", "低温"),
    ("91", "寒冷"),
    ("92", "灰霾"),
    ("93", "雷雨大风"),
    ("94", "森林火险"),
    ("95", "降温"),
    ("96", "道路冰雪"),
    ("97", "干热风"),
    ("98", "空气重污染"),
    ("99", "低温"),
];

const SEVERITY_LEVELS: &[(&str, &str)] = &[
    ("01", "蓝色"),
    ("02", "黄色"),
    ("03", "橙色"),
    ("04", "红色"),
    ("05", "白色"),
];

pub fn disaster_type_name(code: &str) -> &'static str {
    lookup(DISASTER_TYPES, code)
}

pub fn severity_level_name(code: &str) -> &'static str {
    lookup(SEVERITY_LEVELS, code)
}

fn lookup(table: &[(&str, &'static str)], code: &str) -> &'static str {
    table
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
        .unwrap_or(UNKNOWN_LABEL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes() {
        assert_eq!(disaster_type_name("02"), "暴雨");
        assert_eq!(severity_level_name("04"), "红色");
    }

    #[test]
    fn test_unknown_codes_use_sentinel() {
        assert_eq!(disaster_type_name("00"), UNKNOWN_LABEL);
        assert_eq!(severity_level_name("09"), UNKNOWN_LABEL);
    }
}
